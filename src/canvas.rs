use crate::assets::{Asset, AssetBundle};
use crate::deferred::PlaceholderId;
use crate::types::{Color, Pt, Rect, Size};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    Translate(Pt, Pt),
    Rotate(f32),
    ConcatMatrix {
        a: f32,
        b: f32,
        c: f32,
        d: f32,
        e: Pt,
        f: Pt,
    },
    // Non-rendered metadata used for page-aware reporting. Ignored by the PDF writer.
    Meta {
        key: String,
        value: String,
    },
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    SetLineCap(u8),
    SetLineJoin(u8),
    // Applies both fill and stroke alpha. Values outside 0..1 are clamped.
    SetOpacity {
        fill: f32,
        stroke: f32,
    },
    SetFontSize(Pt),
    ClipRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    MoveTo {
        x: Pt,
        y: Pt,
    },
    LineTo {
        x: Pt,
        y: Pt,
    },
    CurveTo {
        x1: Pt,
        y1: Pt,
        x2: Pt,
        y2: Pt,
        x: Pt,
        y: Pt,
    },
    ClosePath,
    Fill,
    FillEvenOdd,
    Stroke,
    FillStroke,
    DrawString {
        x: Pt,
        y: Pt,
        text: String,
    },
    // Filled with the current fill color.
    DrawRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        resource_id: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedRegion {
    pub name: Option<String>,
    pub rect: Rect,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub commands: Vec<Command>,
    pub regions: Vec<NamedRegion>,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub page_size: Size,
    pub pages: Vec<Page>,
    pub assets: AssetBundle,
}

#[derive(Debug, Clone)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    font_size: Pt,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            font_size: Pt::from_f32(12.0),
        }
    }
}

pub struct Canvas {
    page_size: Size,
    pages: Vec<Page>,
    current: Page,
    state_stack: Vec<GraphicsState>,
    current_state: GraphicsState,
    placeholders: HashMap<PlaceholderId, Rect>,
    assets: AssetBundle,
}

impl Canvas {
    pub fn new(page_size: Size) -> Self {
        Self {
            page_size,
            pages: Vec::new(),
            current: Page::default(),
            state_stack: Vec::new(),
            current_state: GraphicsState::default(),
            placeholders: HashMap::new(),
            assets: AssetBundle::default(),
        }
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.current_state.clone());
        self.current.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
            self.current.commands.push(Command::RestoreState);
        }
    }

    pub fn saved_state(&mut self) -> StateGuard<'_> {
        self.save_state();
        StateGuard { canvas: self }
    }

    pub fn state_depth(&self) -> usize {
        self.state_stack.len()
    }

    pub fn translate(&mut self, x: Pt, y: Pt) {
        self.current.commands.push(Command::Translate(x, y));
    }

    pub fn rotate(&mut self, angle_radians: f32) {
        self.current.commands.push(Command::Rotate(angle_radians));
    }

    pub fn concat_matrix(&mut self, a: f32, b: f32, c: f32, d: f32, e: Pt, f: Pt) {
        self.current
            .commands
            .push(Command::ConcatMatrix { a, b, c, d, e, f });
    }

    pub fn record_fragment_bounds(&mut self, rect: Rect) {
        let value = format!(
            "{},{},{},{}",
            rect.x.to_milli_i64(),
            rect.y.to_milli_i64(),
            rect.width.to_milli_i64(),
            rect.height.to_milli_i64()
        );
        self.meta("__bp_bbox", value);
    }

    pub fn meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.current.commands.push(Command::Meta {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn record_placeholder(&mut self, id: PlaceholderId, rect: Rect) {
        self.placeholders.insert(id, rect);
    }

    pub fn placeholder_rect(&self, id: PlaceholderId) -> Option<Rect> {
        self.placeholders.get(&id).copied()
    }

    pub fn add_region(&mut self, region: NamedRegion) {
        self.current.regions.push(region);
    }

    pub fn add_asset(&mut self, asset: Asset) {
        self.assets.add(asset);
    }

    pub fn add_assets(&mut self, bundle: AssetBundle) {
        self.assets.extend(bundle);
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.current.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.current_state.stroke_color == color {
            return;
        }
        self.current_state.stroke_color = color;
        self.current.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: Pt) {
        let width = width.max(Pt::ZERO);
        if self.current_state.line_width == width {
            return;
        }
        self.current_state.line_width = width;
        self.current.commands.push(Command::SetLineWidth(width));
    }

    pub fn set_line_cap(&mut self, cap: u8) {
        self.current.commands.push(Command::SetLineCap(cap));
    }

    pub fn set_line_join(&mut self, join: u8) {
        self.current.commands.push(Command::SetLineJoin(join));
    }

    pub fn set_opacity(&mut self, fill: f32, stroke: f32) {
        self.current.commands.push(Command::SetOpacity {
            fill: fill.clamp(0.0, 1.0),
            stroke: stroke.clamp(0.0, 1.0),
        });
    }

    pub fn set_font_size(&mut self, size: Pt) {
        if self.current_state.font_size == size {
            return;
        }
        self.current_state.font_size = size;
        self.current.commands.push(Command::SetFontSize(size));
    }

    pub fn clip_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.current.commands.push(Command::ClipRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn move_to(&mut self, x: Pt, y: Pt) {
        self.current.commands.push(Command::MoveTo { x, y });
    }

    pub fn line_to(&mut self, x: Pt, y: Pt) {
        self.current.commands.push(Command::LineTo { x, y });
    }

    pub fn curve_to(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt, x: Pt, y: Pt) {
        self.current.commands.push(Command::CurveTo {
            x1,
            y1,
            x2,
            y2,
            x,
            y,
        });
    }

    pub fn close_path(&mut self) {
        self.current.commands.push(Command::ClosePath);
    }

    pub fn fill(&mut self) {
        self.current.commands.push(Command::Fill);
    }

    pub fn fill_evenodd(&mut self) {
        self.current.commands.push(Command::FillEvenOdd);
    }

    pub fn stroke(&mut self) {
        self.current.commands.push(Command::Stroke);
    }

    pub fn fill_stroke(&mut self) {
        self.current.commands.push(Command::FillStroke);
    }

    pub fn draw_string(&mut self, x: Pt, y: Pt, text: impl Into<String>) {
        self.current.commands.push(Command::DrawString {
            x,
            y,
            text: text.into(),
        });
    }

    pub fn draw_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.current.commands.push(Command::DrawRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn draw_image(
        &mut self,
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        resource_id: impl Into<String>,
    ) {
        self.current.commands.push(Command::DrawImage {
            x,
            y,
            width,
            height,
            resource_id: resource_id.into(),
        });
    }

    pub fn commands(&self) -> &[Command] {
        &self.current.commands
    }

    pub fn current_command_count(&self) -> usize {
        self.current.commands.len()
    }

    pub fn is_current_empty(&self) -> bool {
        self.current.commands.is_empty() && self.current.regions.is_empty()
    }

    pub fn show_page(&mut self) {
        let current = std::mem::take(&mut self.current);
        self.pages.push(current);
        self.state_stack.clear();
        self.current_state = GraphicsState::default();
        self.placeholders.clear();
    }

    pub fn finish(mut self) -> Document {
        if !self.is_current_empty() || self.pages.is_empty() {
            self.show_page();
        }
        Document {
            page_size: self.page_size,
            pages: self.pages,
            assets: self.assets,
        }
    }
}

pub struct StateGuard<'a> {
    canvas: &'a mut Canvas,
}

impl Deref for StateGuard<'_> {
    type Target = Canvas;

    fn deref(&self) -> &Canvas {
        &*self.canvas
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut Canvas {
        &mut *self.canvas
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.canvas.restore_state();
    }
}

// Clips to width x height at the current origin and flips y; both undone on drop.
pub struct DrawingSurface<'a> {
    canvas: &'a mut Canvas,
    width: Pt,
    height: Pt,
}

impl<'a> DrawingSurface<'a> {
    pub fn acquire(canvas: &'a mut Canvas, width: Pt, height: Pt) -> Self {
        canvas.save_state();
        canvas.clip_rect(Pt::ZERO, Pt::ZERO, width, height);
        canvas.concat_matrix(1.0, 0.0, 0.0, -1.0, Pt::ZERO, height);
        Self {
            canvas,
            width,
            height,
        }
    }

    pub fn width(&self) -> Pt {
        self.width
    }

    pub fn height(&self) -> Pt {
        self.height
    }
}

impl Deref for DrawingSurface<'_> {
    type Target = Canvas;

    fn deref(&self) -> &Canvas {
        &*self.canvas
    }
}

impl DerefMut for DrawingSurface<'_> {
    fn deref_mut(&mut self) -> &mut Canvas {
        &mut *self.canvas
    }
}

impl Drop for DrawingSurface<'_> {
    fn drop(&mut self) {
        self.canvas.restore_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_guard_restores_on_drop() {
        let mut canvas = Canvas::new(Size::a4());
        {
            let mut guard = canvas.saved_state();
            guard.translate(Pt::from_f32(5.0), Pt::ZERO);
            assert_eq!(guard.state_depth(), 1);
        }
        assert_eq!(canvas.state_depth(), 0);
        assert_eq!(
            canvas.commands(),
            &[
                Command::SaveState,
                Command::Translate(Pt::from_f32(5.0), Pt::ZERO),
                Command::RestoreState,
            ]
        );
    }

    #[test]
    fn drawing_surface_clips_and_flips() {
        let mut canvas = Canvas::new(Size::a4());
        let w = Pt::from_f32(40.0);
        let h = Pt::from_f32(20.0);
        {
            let mut surface = DrawingSurface::acquire(&mut canvas, w, h);
            assert_eq!(surface.width(), w);
            surface.draw_rect(Pt::ZERO, Pt::ZERO, w, h);
        }
        let cmds = canvas.commands();
        assert_eq!(cmds[0], Command::SaveState);
        assert!(matches!(cmds[1], Command::ClipRect { width, height, .. } if width == w && height == h));
        assert!(matches!(cmds[2], Command::ConcatMatrix { d, f, .. } if d == -1.0 && f == h));
        assert_eq!(cmds.last(), Some(&Command::RestoreState));
        assert_eq!(canvas.state_depth(), 0);
    }

    #[test]
    fn redundant_colors_are_skipped() {
        let mut canvas = Canvas::new(Size::a4());
        canvas.set_fill_color(Color::BLACK);
        canvas.set_fill_color(Color::WHITE);
        canvas.set_fill_color(Color::WHITE);
        assert_eq!(canvas.current_command_count(), 1);
    }

    #[test]
    fn show_page_forgets_placeholders() {
        let mut canvas = Canvas::new(Size::a4());
        let id = PlaceholderId(3);
        canvas.record_placeholder(id, Rect::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(canvas.placeholder_rect(id), Some(Rect::new(1.0, 2.0, 3.0, 4.0)));
        canvas.draw_rect(Pt::ZERO, Pt::ZERO, Pt::ZERO, Pt::ZERO);
        canvas.show_page();
        assert_eq!(canvas.placeholder_rect(id), None);
        let doc = canvas.finish();
        assert_eq!(doc.pages.len(), 1);
    }
}
