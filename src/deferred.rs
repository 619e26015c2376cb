use crate::canvas::Canvas;
use crate::debug::{DebugLogger, json_str};
use crate::error::{BlockPrintError, Result};
use crate::types::Rect;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceholderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Page,
    Placeholder(PlaceholderId),
}

pub trait Drawer: Send + fmt::Debug {
    fn paint(&self, canvas: &mut Canvas, placement: Option<Rect>) -> Result<()>;

    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

struct DeferredDraw {
    anchor: Anchor,
    drawer: Box<dyn Drawer>,
}

#[derive(Default)]
pub struct DrawRegistry {
    entries: Vec<DeferredDraw>,
}

impl fmt::Debug for DrawRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (e.anchor, e.drawer.kind())))
            .finish()
    }
}

impl DrawRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_absolute_drawer(&mut self, drawer: Box<dyn Drawer>) -> usize {
        self.push(Anchor::Page, drawer)
    }

    pub fn add_placeholder_drawer(&mut self, id: PlaceholderId, drawer: Box<dyn Drawer>) -> usize {
        self.push(Anchor::Placeholder(id), drawer)
    }

    fn push(&mut self, anchor: Anchor, drawer: Box<dyn Drawer>) -> usize {
        self.entries.push(DeferredDraw { anchor, drawer });
        self.entries.len() - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn anchors(&self) -> impl Iterator<Item = Anchor> + '_ {
        self.entries.iter().map(|e| e.anchor)
    }

    // Consumes the registry so no entry fires twice; the first failing entry aborts.
    pub fn replay(self, canvas: &mut Canvas, debug: Option<&DebugLogger>) -> Result<usize> {
        let total = self.entries.len();
        for (index, entry) in self.entries.into_iter().enumerate() {
            let placement = match entry.anchor {
                Anchor::Page => None,
                Anchor::Placeholder(id) => Some(
                    canvas
                        .placeholder_rect(id)
                        .ok_or(BlockPrintError::UnplacedPlaceholder(id.0))?,
                ),
            };
            entry.drawer.paint(canvas, placement)?;
            if let Some(logger) = debug {
                logger.log_event(
                    "deferred.paint",
                    &[
                        ("index", index.to_string()),
                        ("kind", json_str(entry.drawer.kind())),
                    ],
                );
                logger.increment("deferred.paint", 1);
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Command;
    use crate::types::{Pt, Size};
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct Recording {
        label: usize,
        log: Arc<Mutex<Vec<(usize, Option<Rect>)>>>,
    }

    impl Drawer for Recording {
        fn paint(&self, canvas: &mut Canvas, placement: Option<Rect>) -> Result<()> {
            self.log.lock().unwrap().push((self.label, placement));
            canvas.meta("painted", self.label.to_string());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl Drawer for Failing {
        fn paint(&self, _canvas: &mut Canvas, _placement: Option<Rect>) -> Result<()> {
            Err(BlockPrintError::Transcode("broken".into()))
        }
    }

    fn recording(label: usize, log: &Arc<Mutex<Vec<(usize, Option<Rect>)>>>) -> Box<dyn Drawer> {
        Box::new(Recording {
            label,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn replays_in_registration_order_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = DrawRegistry::new();
        assert_eq!(registry.add_absolute_drawer(recording(0, &log)), 0);
        assert_eq!(registry.add_absolute_drawer(recording(1, &log)), 1);
        assert_eq!(registry.add_absolute_drawer(recording(2, &log)), 2);

        let mut canvas = Canvas::new(Size::a4());
        let painted = registry.replay(&mut canvas, None).unwrap();
        assert_eq!(painted, 3);
        let order: Vec<usize> = log.lock().unwrap().iter().map(|(l, _)| *l).collect();
        assert_eq!(order, vec![0, 1, 2]);
        let metas = canvas
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::Meta { .. }))
            .count();
        assert_eq!(metas, 3);
    }

    #[test]
    fn placeholder_entries_receive_recorded_rect() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = DrawRegistry::new();
        let id = PlaceholderId(7);
        registry.add_placeholder_drawer(id, recording(0, &log));
        registry.add_absolute_drawer(recording(1, &log));
        assert_eq!(
            registry.anchors().collect::<Vec<_>>(),
            vec![Anchor::Placeholder(id), Anchor::Page]
        );

        let mut canvas = Canvas::new(Size::a4());
        let rect = Rect::new(20.0, 30.0, 100.0, 50.0);
        canvas.record_placeholder(id, rect);
        registry.replay(&mut canvas, None).unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log[0], (0, Some(rect)));
        assert_eq!(log[1], (1, None));
    }

    #[test]
    fn unplaced_placeholder_is_a_layout_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = DrawRegistry::new();
        registry.add_placeholder_drawer(PlaceholderId(1), recording(0, &log));
        let mut canvas = Canvas::new(Size::a4());
        let err = registry.replay(&mut canvas, None).unwrap_err();
        assert!(matches!(err, BlockPrintError::UnplacedPlaceholder(1)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn failure_stops_the_pass() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = DrawRegistry::new();
        registry.add_absolute_drawer(recording(0, &log));
        registry.add_absolute_drawer(Box::new(Failing));
        registry.add_absolute_drawer(recording(2, &log));
        let mut canvas = Canvas::new(Size::a4());
        canvas.translate(Pt::ZERO, Pt::ZERO);
        assert!(registry.replay(&mut canvas, None).is_err());
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
