use crate::canvas::Canvas;
use crate::context::RenderContext;
use crate::deferred::{Drawer, PlaceholderId};
use crate::table::Table;
use crate::types::{HorizontalAlign, Pt, Rect, Size};

#[derive(Debug, Default)]
pub struct FlowTarget {
    fragments: Vec<Fragment>,
}

impl FlowTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, fragment: Fragment) {
        self.fragments.push(fragment);
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter()
    }

    pub fn into_fragments(self) -> Vec<Fragment> {
        self.fragments
    }
}

#[derive(Debug, Clone)]
pub enum Fragment {
    Text(TextFragment),
    Image(ImageFragment),
    Placeholder(Placeholder),
    Table(Table),
}

impl Fragment {
    pub fn wrap(&self, avail_width: Pt) -> Size {
        match self {
            Fragment::Text(text) => text.wrap(avail_width),
            Fragment::Image(image) => Size {
                width: image.box_width,
                height: image.box_height,
            },
            Fragment::Placeholder(placeholder) => Size {
                width: placeholder.width,
                height: placeholder.height,
            },
            Fragment::Table(table) => table.wrap(avail_width),
        }
    }

    pub fn spacing_after(&self) -> Pt {
        match self {
            Fragment::Text(text) => text.spacing_after,
            Fragment::Image(image) => image.spacing_after,
            Fragment::Placeholder(placeholder) => placeholder.spacing_after,
            Fragment::Table(table) => table.spacing_after(),
        }
    }

    pub fn align(&self) -> HorizontalAlign {
        match self {
            Fragment::Text(text) => text.align,
            Fragment::Image(image) => image.align,
            Fragment::Placeholder(placeholder) => placeholder.align,
            Fragment::Table(table) => table.align(),
        }
    }

    pub fn draw(&self, canvas: &mut Canvas, x: Pt, top: Pt, avail_width: Pt) -> Rect {
        let size = self.wrap(avail_width);
        let left = x + self.align().offset(avail_width, size.width);
        let rect = Rect {
            x: left,
            y: top - size.height,
            width: size.width,
            height: size.height,
        };
        match self {
            Fragment::Text(text) => text.draw(canvas, rect, avail_width),
            Fragment::Image(image) => image.draw(canvas, rect),
            Fragment::Placeholder(placeholder) => canvas.record_placeholder(placeholder.id, rect),
            Fragment::Table(table) => {
                table.write_rows(0.., left, top, avail_width, canvas);
            }
        }
        rect
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Fragment::Text(_) => "text",
            Fragment::Image(_) => "image",
            Fragment::Placeholder(_) => "placeholder",
            Fragment::Table(_) => "table",
        }
    }
}

const LINE_HEIGHT: f32 = 1.2;
const GLYPH_ADVANCE: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct TextFragment {
    pub text: String,
    pub font_size: Pt,
    pub align: HorizontalAlign,
    pub spacing_after: Pt,
}

impl TextFragment {
    fn line_height(&self) -> Pt {
        self.font_size * LINE_HEIGHT
    }

    fn advance(&self, chars: usize) -> Pt {
        self.font_size * (GLYPH_ADVANCE * chars as f32)
    }

    fn lines(&self, avail_width: Pt) -> Vec<String> {
        let mut lines = Vec::new();
        for paragraph in self.text.split('\n') {
            let mut line = String::new();
            for word in paragraph.split_whitespace() {
                let candidate = if line.is_empty() {
                    word.to_string()
                } else {
                    format!("{line} {word}")
                };
                if !line.is_empty() && self.advance(candidate.chars().count()) > avail_width {
                    lines.push(std::mem::replace(&mut line, word.to_string()));
                } else {
                    line = candidate;
                }
            }
            lines.push(line);
        }
        lines
    }

    fn wrap(&self, avail_width: Pt) -> Size {
        let lines = self.lines(avail_width);
        let widest = lines
            .iter()
            .map(|l| self.advance(l.chars().count()))
            .fold(Pt::ZERO, Pt::max);
        Size {
            width: widest.min(avail_width),
            height: self.line_height() * lines.len() as f32,
        }
    }

    fn draw(&self, canvas: &mut Canvas, rect: Rect, avail_width: Pt) {
        canvas.set_font_size(self.font_size);
        let line_height = self.line_height();
        let mut baseline = rect.top() - self.font_size;
        for line in self.lines(avail_width) {
            if !line.is_empty() {
                canvas.draw_string(rect.x, baseline, line);
            }
            baseline -= line_height;
        }
    }
}

// box_* is the axis-aligned box of the rotated image, which the flow reserves.
#[derive(Debug, Clone)]
pub struct ImageFragment {
    pub resource_id: String,
    pub width: Pt,
    pub height: Pt,
    pub rotation: f32,
    pub box_width: Pt,
    pub box_height: Pt,
    pub align: HorizontalAlign,
    pub spacing_after: Pt,
}

impl ImageFragment {
    pub fn new(resource_id: String, width: Pt, height: Pt, rotation: f32) -> Self {
        let (box_width, box_height) = rotated_bounds(width, height, rotation);
        Self {
            resource_id,
            width,
            height,
            rotation,
            box_width,
            box_height,
            align: HorizontalAlign::default(),
            spacing_after: Pt::ZERO,
        }
    }

    fn draw(&self, canvas: &mut Canvas, rect: Rect) {
        if self.rotation == 0.0 {
            canvas.draw_image(rect.x, rect.y, self.width, self.height, self.resource_id.clone());
            return;
        }
        let mut guard = canvas.saved_state();
        guard.translate(rect.x + rect.width / 2, rect.y + rect.height / 2);
        guard.rotate(self.rotation);
        guard.draw_image(
            -(self.width / 2),
            -(self.height / 2),
            self.width,
            self.height,
            self.resource_id.clone(),
        );
    }
}

pub fn rotated_bounds(width: Pt, height: Pt, radians: f32) -> (Pt, Pt) {
    if radians == 0.0 {
        return (width, height);
    }
    let (w, h) = (width.to_f32(), height.to_f32());
    let mut corners = [
        tiny_skia::Point::from_xy(0.0, 0.0),
        tiny_skia::Point::from_xy(w, 0.0),
        tiny_skia::Point::from_xy(w, h),
        tiny_skia::Point::from_xy(0.0, h),
    ];
    tiny_skia::Transform::from_rotate(radians.to_degrees()).map_points(&mut corners);
    let (mut min_x, mut max_x) = (f32::MAX, f32::MIN);
    let (mut min_y, mut max_y) = (f32::MAX, f32::MIN);
    for p in &corners {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    (Pt::from_f32(max_x - min_x), Pt::from_f32(max_y - min_y))
}

#[derive(Debug, Clone)]
pub struct Placeholder {
    pub id: PlaceholderId,
    pub width: Pt,
    pub height: Pt,
    pub spacing_after: Pt,
    pub align: HorizontalAlign,
}

pub fn create_placeholder(
    width: Pt,
    height: Pt,
    spacing_after: Pt,
    drawer: Box<dyn Drawer>,
    align: HorizontalAlign,
    ctx: &mut RenderContext,
) -> Fragment {
    let id = ctx.next_placeholder_id();
    ctx.register_placeholder(id, drawer);
    Fragment::Placeholder(Placeholder {
        id,
        width: width.max(Pt::ZERO),
        height: height.max(Pt::ZERO),
        spacing_after,
        align,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Command;
    use crate::context::Services;
    use crate::error::Result;
    use crate::expr::Params;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Noop;

    impl Drawer for Noop {
        fn paint(&self, _canvas: &mut Canvas, _placement: Option<Rect>) -> Result<()> {
            Ok(())
        }
    }

    fn text(s: &str) -> TextFragment {
        TextFragment {
            text: s.to_string(),
            font_size: Pt::from_f32(10.0),
            align: HorizontalAlign::Left,
            spacing_after: Pt::ZERO,
        }
    }

    #[test]
    fn text_wraps_greedily() {
        // 5pt per glyph: "aaaa bbbb" is 45pt, so a 30pt band forces two lines.
        let frag = text("aaaa bbbb");
        assert_eq!(frag.lines(Pt::from_f32(30.0)), vec!["aaaa", "bbbb"]);
        assert_eq!(frag.lines(Pt::from_f32(100.0)), vec!["aaaa bbbb"]);
        let size = frag.wrap(Pt::from_f32(30.0));
        assert_eq!(size.height, Pt::from_f32(24.0));
        assert_eq!(size.width, Pt::from_f32(20.0));
    }

    #[test]
    fn quarter_turn_swaps_bounds() {
        let (w, h) = rotated_bounds(
            Pt::from_f32(40.0),
            Pt::from_f32(10.0),
            std::f32::consts::FRAC_PI_2,
        );
        assert!((w.to_f32() - 10.0).abs() < 0.01);
        assert!((h.to_f32() - 40.0).abs() < 0.01);
    }

    #[test]
    fn placeholder_records_its_rect_when_drawn() {
        let mut ctx = RenderContext::new(
            Arc::new(Services::default()),
            Params::new(),
            Size::a4(),
            Pt::from_f32(200.0),
        );
        let frag = create_placeholder(
            Pt::from_f32(50.0),
            Pt::from_f32(20.0),
            Pt::from_f32(5.0),
            Box::new(Noop),
            HorizontalAlign::Center,
            &mut ctx,
        );
        assert_eq!(ctx.registry().len(), 1);
        let Fragment::Placeholder(ref placeholder) = frag else {
            panic!("expected placeholder");
        };
        let id = placeholder.id;
        let mut canvas = Canvas::new(Size::a4());
        let rect = frag.draw(&mut canvas, Pt::from_f32(10.0), Pt::from_f32(700.0), Pt::from_f32(200.0));
        assert_eq!(rect, Rect::new(85.0, 680.0, 50.0, 20.0));
        assert_eq!(canvas.placeholder_rect(id), Some(rect));
        assert!(canvas.commands().is_empty());
    }

    #[test]
    fn rotated_image_draws_about_its_center() {
        let frag = ImageFragment::new(
            "img:x".into(),
            Pt::from_f32(40.0),
            Pt::from_f32(10.0),
            std::f32::consts::FRAC_PI_2,
        );
        let mut canvas = Canvas::new(Size::a4());
        Fragment::Image(frag).draw(&mut canvas, Pt::ZERO, Pt::from_f32(100.0), Pt::from_f32(10.0));
        let cmds = canvas.commands();
        assert_eq!(cmds[0], Command::SaveState);
        assert!(matches!(cmds[2], Command::Rotate(r) if r == std::f32::consts::FRAC_PI_2));
        assert!(matches!(cmds[3], Command::DrawImage { x, .. } if x == Pt::from_f32(-20.0)));
        assert_eq!(canvas.state_depth(), 0);
    }
}
