use crate::canvas::Canvas;
use crate::error::{BlockPrintError, Result};
use crate::fragment::Fragment;
use crate::types::{Pt, Rect};

pub struct Frame {
    rect: Rect,
    cursor_y: Pt,
}

impl Frame {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            cursor_y: Pt::ZERO,
        }
    }

    pub fn remaining_height(&self) -> Pt {
        (self.rect.height - self.cursor_y).max(Pt::ZERO)
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn is_empty(&self) -> bool {
        self.cursor_y <= Pt::ZERO
    }

    // No page break: a fragment taller than the remaining height is an error.
    pub fn add(&mut self, fragment: &Fragment, canvas: &mut Canvas) -> Result<Rect> {
        let avail_width = self.rect.width;
        let size = fragment.wrap(avail_width);
        if size.height > self.remaining_height() {
            return Err(BlockPrintError::UnplaceableFragment(format!(
                "{} fragment {}pt tall, {}pt left",
                fragment.kind(),
                size.height.to_f32(),
                self.remaining_height().to_f32()
            )));
        }
        let top = self.rect.top() - self.cursor_y;
        let rect = fragment.draw(canvas, self.rect.x, top, avail_width);
        canvas.record_fragment_bounds(rect);
        self.cursor_y += size.height + fragment.spacing_after();
        Ok(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Command;
    use crate::fragment::TextFragment;
    use crate::types::{HorizontalAlign, Size};

    fn line(text: &str, spacing: f32) -> Fragment {
        Fragment::Text(TextFragment {
            text: text.to_string(),
            font_size: Pt::from_f32(10.0),
            align: HorizontalAlign::Left,
            spacing_after: Pt::from_f32(spacing),
        })
    }

    #[test]
    fn stacks_fragments_top_down() {
        let mut canvas = Canvas::new(Size::a4());
        let mut frame = Frame::new(Rect::new(50.0, 100.0, 200.0, 300.0));
        let first = frame.add(&line("one", 6.0), &mut canvas).unwrap();
        let second = frame.add(&line("two", 0.0), &mut canvas).unwrap();
        assert_eq!(first.top(), Pt::from_f32(400.0));
        // 12pt line plus 6pt spacing.
        assert_eq!(second.top(), Pt::from_f32(382.0));
        assert_eq!(frame.remaining_height(), Pt::from_f32(300.0 - 30.0));
        assert!(canvas.commands().iter().any(
            |c| matches!(c, Command::Meta { key, .. } if key == "__bp_bbox")
        ));
    }

    #[test]
    fn oversized_fragment_is_an_error() {
        let mut canvas = Canvas::new(Size::a4());
        let mut frame = Frame::new(Rect::new(0.0, 0.0, 200.0, 20.0));
        frame.add(&line("fits", 0.0), &mut canvas).unwrap();
        let err = frame.add(&line("does not", 0.0), &mut canvas).unwrap_err();
        assert!(matches!(err, BlockPrintError::UnplaceableFragment(ref kind) if kind.starts_with("text")));
    }
}
