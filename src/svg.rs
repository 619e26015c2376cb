use crate::assets::{Locator, ResourceLoader};
use crate::canvas::{Canvas, DrawingSurface};
use crate::error::{BlockPrintError, Result};
use crate::types::{Color, Pt, Rect};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeOptions {
    pub scale_to_page: bool,
    pub suppress_warnings: bool,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            scale_to_page: true,
            suppress_warnings: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFormat {
    pub width: Pt,
    pub height: Pt,
    pub imageable: Rect,
}

impl PageFormat {
    pub fn new(width: Pt, height: Pt) -> Self {
        Self {
            width,
            height,
            imageable: Rect {
                x: Pt::ZERO,
                y: Pt::ZERO,
                width,
                height,
            },
        }
    }
}

pub trait VectorProgram: Send + Sync + fmt::Debug {
    fn natural_size(&self) -> Option<(f32, f32)>;

    fn print(&self, surface: &mut DrawingSurface<'_>, format: &PageFormat) -> Result<()>;
}

pub trait Transcoder: Send + Sync {
    fn transcode(
        &self,
        locator: &Locator,
        loader: &dyn ResourceLoader,
        options: &TranscodeOptions,
    ) -> Result<Arc<dyn VectorProgram>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SvgTranscoder;

impl Transcoder for SvgTranscoder {
    fn transcode(
        &self,
        locator: &Locator,
        loader: &dyn ResourceLoader,
        options: &TranscodeOptions,
    ) -> Result<Arc<dyn VectorProgram>> {
        let bytes = loader.load(locator)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| BlockPrintError::Transcode(format!("{locator}: not valid UTF-8")))?;
        let program = SvgProgram::compile(&text, options).map_err(|reason| {
            BlockPrintError::Transcode(format!("{locator}: {reason}"))
        })?;
        Ok(Arc::new(program))
    }
}

#[derive(Debug, Clone, Copy)]
struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    fn identity() -> Self {
        Self::translate(0.0, 0.0)
    }

    fn translate(tx: f32, ty: f32) -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: tx,
            f: ty,
        }
    }

    fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            b: 0.0,
            c: 0.0,
            d: sy,
            e: 0.0,
            f: 0.0,
        }
    }

    fn rotate(deg: f32) -> Self {
        let rad = deg.to_radians();
        let s = libm::sinf(rad);
        let c = libm::cosf(rad);
        Self {
            a: c,
            b: s,
            c: -s,
            d: c,
            e: 0.0,
            f: 0.0,
        }
    }

    // [self] * [other]
    fn mul(self, other: Self) -> Self {
        Self {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    fn apply(self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    // sqrt(|det|); scales stroke widths.
    fn scale_factor(self) -> f32 {
        let det = self.a * self.d - self.b * self.c;
        libm::sqrtf(det.abs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PathSeg {
    MoveTo(f32, f32),
    LineTo(f32, f32),
    CurveTo(f32, f32, f32, f32, f32, f32),
    Close,
}

impl PathSeg {
    fn transformed(self, m: Matrix) -> Self {
        match self {
            PathSeg::MoveTo(x, y) => {
                let (x, y) = m.apply(x, y);
                PathSeg::MoveTo(x, y)
            }
            PathSeg::LineTo(x, y) => {
                let (x, y) = m.apply(x, y);
                PathSeg::LineTo(x, y)
            }
            PathSeg::CurveTo(x1, y1, x2, y2, x, y) => {
                let (x1, y1) = m.apply(x1, y1);
                let (x2, y2) = m.apply(x2, y2);
                let (x, y) = m.apply(x, y);
                PathSeg::CurveTo(x1, y1, x2, y2, x, y)
            }
            PathSeg::Close => PathSeg::Close,
        }
    }
}

#[derive(Debug, Clone)]
struct SvgStyle {
    fill: Option<Color>,
    stroke: Option<Color>,
    stroke_width: f32,
    line_cap: u8,
    line_join: u8,
    fill_rule_evenodd: bool,
    fill_opacity: f32,
    stroke_opacity: f32,
}

impl Default for SvgStyle {
    // SVG defaults: black fill, no stroke.
    fn default() -> Self {
        Self {
            fill: Some(Color::BLACK),
            stroke: None,
            stroke_width: 1.0,
            line_cap: 0,
            line_join: 0,
            fill_rule_evenodd: false,
            fill_opacity: 1.0,
            stroke_opacity: 1.0,
        }
    }
}

impl SvgStyle {
    fn apply(&mut self, key: &str, value: &str) {
        let value = value.trim();
        match key {
            "fill" => parse_paint_into(value, &mut self.fill),
            "stroke" => parse_paint_into(value, &mut self.stroke),
            "stroke-width" => {
                if let Some(v) = parse_number(value) {
                    self.stroke_width = v.max(0.0);
                }
            }
            "stroke-linecap" => {
                self.line_cap = match value {
                    "round" => 1,
                    "square" => 2,
                    _ => 0,
                };
            }
            "stroke-linejoin" => {
                self.line_join = match value {
                    "round" => 1,
                    "bevel" => 2,
                    _ => 0,
                };
            }
            "fill-rule" => self.fill_rule_evenodd = value.eq_ignore_ascii_case("evenodd"),
            // Opacities multiply down the tree.
            "opacity" => {
                if let Some(v) = parse_number(value) {
                    let o = v.clamp(0.0, 1.0);
                    self.fill_opacity *= o;
                    self.stroke_opacity *= o;
                }
            }
            "fill-opacity" => {
                if let Some(v) = parse_number(value) {
                    self.fill_opacity *= v.clamp(0.0, 1.0);
                }
            }
            "stroke-opacity" => {
                if let Some(v) = parse_number(value) {
                    self.stroke_opacity *= v.clamp(0.0, 1.0);
                }
            }
            _ => {}
        }
    }

    fn has_fill(&self) -> bool {
        self.fill.is_some()
    }

    fn has_stroke(&self) -> bool {
        self.stroke.is_some() && self.stroke_width > 0.0
    }
}

const STYLE_ATTRIBUTES: [&str; 8] = [
    "fill",
    "stroke",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "fill-rule",
    "fill-opacity",
    "stroke-opacity",
];

fn apply_presentation_and_style(node: roxmltree::Node<'_, '_>, style: &mut SvgStyle) {
    for key in STYLE_ATTRIBUTES {
        if let Some(value) = node.attribute(key) {
            style.apply(key, value);
        }
    }
    if let Some(value) = node.attribute("opacity") {
        style.apply("opacity", value);
    }
    if let Some(inline) = node.attribute("style") {
        for decl in inline.split(';') {
            if let Some((k, v)) = decl.split_once(':') {
                style.apply(k.trim().to_ascii_lowercase().as_str(), v);
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledPath {
    segs: Vec<PathSeg>,
    style: SvgStyle,
    scale: f32,
}

#[derive(Debug, Clone)]
pub struct SvgProgram {
    paths: Vec<CompiledPath>,
    natural: Option<(f32, f32)>,
    view_box: Option<(f32, f32, f32, f32)>,
    scale_to_page: bool,
}

impl SvgProgram {
    pub fn compile(svg_xml: &str, options: &TranscodeOptions) -> std::result::Result<Self, String> {
        let doc = roxmltree::Document::parse(svg_xml).map_err(|err| err.to_string())?;
        let root = doc.root_element();
        if !root.tag_name().name().eq_ignore_ascii_case("svg") {
            return Err(format!("root element is <{}>, not <svg>", root.tag_name().name()));
        }

        let view_box = parse_viewbox(root.attribute("viewBox"));
        let width = root.attribute("width").and_then(parse_number);
        let height = root.attribute("height").and_then(parse_number);
        let natural = match (width, height, view_box) {
            (Some(w), Some(h), _) if w > 0.0 && h > 0.0 => Some((w, h)),
            (_, _, Some((_, _, w, h))) => Some((w, h)),
            _ => None,
        };

        let mut compiler = Compiler::default();
        compiler.element(root, Matrix::identity(), &SvgStyle::default());
        for tag in &compiler.unsupported {
            if options.suppress_warnings {
                log::debug!("svg: <{tag}> is not supported and was skipped");
            } else {
                log::warn!("svg: <{tag}> is not supported and was skipped");
            }
        }
        Ok(Self {
            paths: compiler.paths,
            natural,
            view_box,
            scale_to_page: options.scale_to_page,
        })
    }

    pub fn path_count(&self) -> usize {
        self.paths.len()
    }

    fn placement(&self, format: &PageFormat) -> Matrix {
        let area = format.imageable;
        let origin = Matrix::translate(area.x.to_f32(), area.y.to_f32());
        let source = self
            .view_box
            .or_else(|| self.natural.map(|(w, h)| (0.0, 0.0, w, h)));
        let Some((min_x, min_y, vb_w, vb_h)) = source else {
            return origin;
        };
        if !self.scale_to_page || vb_w <= 0.0 || vb_h <= 0.0 {
            return origin.mul(Matrix::translate(-min_x, -min_y));
        }
        let (w, h) = (area.width.to_f32(), area.height.to_f32());
        let s = (w / vb_w).min(h / vb_h);
        let tx = (w - vb_w * s) * 0.5 - min_x * s;
        let ty = (h - vb_h * s) * 0.5 - min_y * s;
        origin
            .mul(Matrix::translate(tx, ty))
            .mul(Matrix::scale(s, s))
    }
}

impl VectorProgram for SvgProgram {
    fn natural_size(&self) -> Option<(f32, f32)> {
        self.natural
    }

    fn print(&self, surface: &mut DrawingSurface<'_>, format: &PageFormat) -> Result<()> {
        let placement = self.placement(format);
        let scale = placement.scale_factor();
        for path in &self.paths {
            draw_path(surface, path, placement, scale);
        }
        Ok(())
    }
}

#[derive(Default)]
struct Compiler {
    paths: Vec<CompiledPath>,
    unsupported: BTreeSet<String>,
}

impl Compiler {
    fn element(&mut self, node: roxmltree::Node<'_, '_>, ctm: Matrix, style: &SvgStyle) {
        if !node.is_element() {
            return;
        }
        let mut local_style = style.clone();
        apply_presentation_and_style(node, &mut local_style);
        let mut local_ctm = ctm;
        if let Some(transform) = node.attribute("transform") {
            local_ctm = local_ctm.mul(parse_transform(transform));
        }

        let segs = match node.tag_name().name() {
            "g" | "svg" => {
                for child in node.children().filter(|n| n.is_element()) {
                    self.element(child, local_ctm, &local_style);
                }
                return;
            }
            "defs" | "title" | "desc" | "metadata" => return,
            "path" => node.attribute("d").map(parse_path_data),
            "rect" => rect_to_path(node),
            "circle" => circle_to_path(node),
            "ellipse" => ellipse_to_path(node),
            "line" => line_to_path(node),
            "polyline" => poly_points_to_path(node, false),
            "polygon" => poly_points_to_path(node, true),
            other => {
                self.unsupported.insert(other.to_string());
                return;
            }
        };
        let Some(segs) = segs else {
            return;
        };
        if segs.is_empty() || (!local_style.has_fill() && !local_style.has_stroke()) {
            return;
        }
        self.paths.push(CompiledPath {
            segs: segs.into_iter().map(|s| s.transformed(local_ctm)).collect(),
            style: local_style,
            scale: local_ctm.scale_factor(),
        });
    }
}

fn draw_path(canvas: &mut Canvas, path: &CompiledPath, placement: Matrix, scale: f32) {
    fn emit(canvas: &mut Canvas, segs: &[PathSeg], m: Matrix) {
        for seg in segs {
            match seg.transformed(m) {
                PathSeg::MoveTo(x, y) => canvas.move_to(Pt::from_f32(x), Pt::from_f32(y)),
                PathSeg::LineTo(x, y) => canvas.line_to(Pt::from_f32(x), Pt::from_f32(y)),
                PathSeg::CurveTo(x1, y1, x2, y2, x, y) => canvas.curve_to(
                    Pt::from_f32(x1),
                    Pt::from_f32(y1),
                    Pt::from_f32(x2),
                    Pt::from_f32(y2),
                    Pt::from_f32(x),
                    Pt::from_f32(y),
                ),
                PathSeg::Close => canvas.close_path(),
            }
        }
    }

    let style = &path.style;
    let has_fill = style.has_fill();
    let has_stroke = style.has_stroke();
    canvas.set_opacity(style.fill_opacity, style.stroke_opacity);
    if let Some(fill) = style.fill {
        canvas.set_fill_color(fill);
    }
    if let Some(stroke) = style.stroke {
        canvas.set_stroke_color(stroke);
        canvas.set_line_width(Pt::from_f32(style.stroke_width * path.scale * scale));
        canvas.set_line_cap(style.line_cap);
        canvas.set_line_join(style.line_join);
    }

    emit(canvas, &path.segs, placement);
    match (has_fill, has_stroke, style.fill_rule_evenodd) {
        (true, true, false) => canvas.fill_stroke(),
        (true, true, true) => {
            canvas.fill_evenodd();
            emit(canvas, &path.segs, placement);
            canvas.stroke();
        }
        (true, false, false) => canvas.fill(),
        (true, false, true) => canvas.fill_evenodd(),
        (false, true, _) => canvas.stroke(),
        (false, false, _) => {}
    }
}

fn parse_viewbox(view_box: Option<&str>) -> Option<(f32, f32, f32, f32)> {
    let nums = parse_number_list(view_box?);
    let [min_x, min_y, w, h] = nums.as_slice() else {
        return None;
    };
    if *w <= 0.0 || *h <= 0.0 {
        return None;
    }
    Some((*min_x, *min_y, *w, *h))
}

fn parse_color(input: &str) -> Option<Color> {
    let v = input.trim();
    if v.starts_with('#') {
        return Color::from_hex(v);
    }
    // Minimal named color set (enough for common exports).
    match v.to_ascii_lowercase().as_str() {
        "black" => Some(Color::BLACK),
        "white" => Some(Color::WHITE),
        "red" => Some(Color::rgb(1.0, 0.0, 0.0)),
        "green" => Some(Color::rgb(0.0, 0.5, 0.0)),
        "blue" => Some(Color::rgb(0.0, 0.0, 1.0)),
        "gray" | "grey" => Some(Color::rgb(0.5, 0.5, 0.5)),
        _ => None,
    }
}

// Unknown paint (e.g. currentColor, gradients) keeps the inherited value.
fn parse_paint_into(input: &str, out: &mut Option<Color>) {
    if input.eq_ignore_ascii_case("none") {
        *out = None;
    } else if let Some(color) = parse_color(input) {
        *out = Some(color);
    }
}

fn parse_number(input: &str) -> Option<f32> {
    // Unit suffixes are ignored; user units are taken as points.
    let s = input
        .trim()
        .trim_end_matches("px")
        .trim_end_matches("pt")
        .trim();
    s.parse::<f32>().ok().filter(|v| v.is_finite())
}

fn parse_number_list(input: &str) -> Vec<f32> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f32>().ok())
        .collect()
}

fn parse_transform(input: &str) -> Matrix {
    let mut out = Matrix::identity();
    let mut s = input.trim();
    while !s.is_empty() {
        let Some(open) = s.find('(') else { break };
        let name = s[..open].trim().trim_start_matches(',').trim();
        let Some(close) = s[open + 1..].find(')') else {
            break;
        };
        let args = parse_number_list(&s[open + 1..open + 1 + close]);
        let arg = |i: usize, default: f32| args.get(i).copied().unwrap_or(default);
        let m = match name {
            "translate" => Matrix::translate(arg(0, 0.0), arg(1, 0.0)),
            "scale" => Matrix::scale(arg(0, 1.0), arg(1, arg(0, 1.0))),
            "rotate" if args.len() >= 3 => Matrix::translate(args[1], args[2])
                .mul(Matrix::rotate(args[0]))
                .mul(Matrix::translate(-args[1], -args[2])),
            "rotate" => Matrix::rotate(arg(0, 0.0)),
            "matrix" if args.len() >= 6 => Matrix {
                a: args[0],
                b: args[1],
                c: args[2],
                d: args[3],
                e: args[4],
                f: args[5],
            },
            _ => Matrix::identity(),
        };
        out = out.mul(m);
        s = s[open + 1 + close + 1..].trim_start();
    }
    out
}

fn attr_number(node: roxmltree::Node<'_, '_>, name: &str) -> f32 {
    node.attribute(name).and_then(parse_number).unwrap_or(0.0)
}

fn rect_to_path(node: roxmltree::Node<'_, '_>) -> Option<Vec<PathSeg>> {
    let x = attr_number(node, "x");
    let y = attr_number(node, "y");
    let w = parse_number(node.attribute("width")?)?;
    let h = parse_number(node.attribute("height")?)?;
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    Some(vec![
        PathSeg::MoveTo(x, y),
        PathSeg::LineTo(x + w, y),
        PathSeg::LineTo(x + w, y + h),
        PathSeg::LineTo(x, y + h),
        PathSeg::Close,
    ])
}

fn circle_to_path(node: roxmltree::Node<'_, '_>) -> Option<Vec<PathSeg>> {
    let r = parse_number(node.attribute("r")?)?;
    ellipse_path(attr_number(node, "cx"), attr_number(node, "cy"), r, r)
}

fn ellipse_to_path(node: roxmltree::Node<'_, '_>) -> Option<Vec<PathSeg>> {
    let rx = parse_number(node.attribute("rx")?)?;
    let ry = parse_number(node.attribute("ry")?)?;
    ellipse_path(attr_number(node, "cx"), attr_number(node, "cy"), rx, ry)
}

// Four cubic Beziers.
fn ellipse_path(cx: f32, cy: f32, rx: f32, ry: f32) -> Option<Vec<PathSeg>> {
    if rx <= 0.0 || ry <= 0.0 {
        return None;
    }
    let k = 0.552_284_75_f32;
    let ox = rx * k;
    let oy = ry * k;
    Some(vec![
        PathSeg::MoveTo(cx + rx, cy),
        PathSeg::CurveTo(cx + rx, cy + oy, cx + ox, cy + ry, cx, cy + ry),
        PathSeg::CurveTo(cx - ox, cy + ry, cx - rx, cy + oy, cx - rx, cy),
        PathSeg::CurveTo(cx - rx, cy - oy, cx - ox, cy - ry, cx, cy - ry),
        PathSeg::CurveTo(cx + ox, cy - ry, cx + rx, cy - oy, cx + rx, cy),
        PathSeg::Close,
    ])
}

fn line_to_path(node: roxmltree::Node<'_, '_>) -> Option<Vec<PathSeg>> {
    Some(vec![
        PathSeg::MoveTo(attr_number(node, "x1"), attr_number(node, "y1")),
        PathSeg::LineTo(attr_number(node, "x2"), attr_number(node, "y2")),
    ])
}

fn poly_points_to_path(node: roxmltree::Node<'_, '_>, close: bool) -> Option<Vec<PathSeg>> {
    let nums = parse_number_list(node.attribute("points")?);
    let points: Vec<(f32, f32)> = nums.chunks_exact(2).map(|p| (p[0], p[1])).collect();
    let (first, rest) = points.split_first()?;
    if rest.is_empty() {
        return None;
    }
    let mut segs = vec![PathSeg::MoveTo(first.0, first.1)];
    segs.extend(rest.iter().map(|(x, y)| PathSeg::LineTo(*x, *y)));
    if close {
        segs.push(PathSeg::Close);
    }
    Some(segs)
}

fn parse_path_data(d: &str) -> Vec<PathSeg> {
    let mut segs = Vec::new();
    let mut p = PathParser::new(d);
    let mut cmd = ' ';
    let (mut cur_x, mut cur_y) = (0.0f32, 0.0f32);
    let (mut start_x, mut start_y) = (0.0f32, 0.0f32);
    let mut last_cubic_ctrl2: Option<(f32, f32)> = None;
    let mut last_quad_ctrl: Option<(f32, f32)> = None;

    loop {
        let before = p.i;
        let Some(c) = p.next_command_or_number(&mut cmd) else {
            break;
        };
        let rel = c.is_ascii_lowercase();
        let abs = |x: f32, y: f32, cx: f32, cy: f32| if rel { (cx + x, cy + y) } else { (x, y) };
        match c {
            'M' | 'm' => {
                if let Some((x, y)) = p.next_pair() {
                    let (x, y) = abs(x, y, cur_x, cur_y);
                    segs.push(PathSeg::MoveTo(x, y));
                    (cur_x, cur_y) = (x, y);
                    (start_x, start_y) = (x, y);
                    // Further pairs are implicit LineTo.
                    while let Some((x, y)) = p.next_pair() {
                        let (x, y) = abs(x, y, cur_x, cur_y);
                        segs.push(PathSeg::LineTo(x, y));
                        (cur_x, cur_y) = (x, y);
                    }
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'L' | 'l' => {
                while let Some((x, y)) = p.next_pair() {
                    let (x, y) = abs(x, y, cur_x, cur_y);
                    segs.push(PathSeg::LineTo(x, y));
                    (cur_x, cur_y) = (x, y);
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'H' | 'h' => {
                while let Some(x) = p.next_number() {
                    cur_x = if rel { cur_x + x } else { x };
                    segs.push(PathSeg::LineTo(cur_x, cur_y));
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'V' | 'v' => {
                while let Some(y) = p.next_number() {
                    cur_y = if rel { cur_y + y } else { y };
                    segs.push(PathSeg::LineTo(cur_x, cur_y));
                }
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            'C' | 'c' => {
                while let Some([x1, y1, x2, y2, x, y]) = p.next_numbers::<6>() {
                    let (x1, y1) = abs(x1, y1, cur_x, cur_y);
                    let (x2, y2) = abs(x2, y2, cur_x, cur_y);
                    let (x, y) = abs(x, y, cur_x, cur_y);
                    segs.push(PathSeg::CurveTo(x1, y1, x2, y2, x, y));
                    (cur_x, cur_y) = (x, y);
                    last_cubic_ctrl2 = Some((x2, y2));
                }
                last_quad_ctrl = None;
            }
            'S' | 's' => {
                while let Some([x2, y2, x, y]) = p.next_numbers::<4>() {
                    let (x2, y2) = abs(x2, y2, cur_x, cur_y);
                    let (x, y) = abs(x, y, cur_x, cur_y);
                    let (x1, y1) = match last_cubic_ctrl2 {
                        Some((px, py)) => (2.0 * cur_x - px, 2.0 * cur_y - py),
                        None => (cur_x, cur_y),
                    };
                    segs.push(PathSeg::CurveTo(x1, y1, x2, y2, x, y));
                    (cur_x, cur_y) = (x, y);
                    last_cubic_ctrl2 = Some((x2, y2));
                }
                last_quad_ctrl = None;
            }
            'Q' | 'q' => {
                while let Some([qx, qy, x, y]) = p.next_numbers::<4>() {
                    let (qx, qy) = abs(qx, qy, cur_x, cur_y);
                    let (x, y) = abs(x, y, cur_x, cur_y);
                    let (c1x, c1y, c2x, c2y) = quad_to_cubic(cur_x, cur_y, qx, qy, x, y);
                    segs.push(PathSeg::CurveTo(c1x, c1y, c2x, c2y, x, y));
                    (cur_x, cur_y) = (x, y);
                    last_quad_ctrl = Some((qx, qy));
                    last_cubic_ctrl2 = Some((c2x, c2y));
                }
            }
            'T' | 't' => {
                while let Some((x, y)) = p.next_pair() {
                    let (x, y) = abs(x, y, cur_x, cur_y);
                    let (qx, qy) = match last_quad_ctrl {
                        Some((px, py)) => (2.0 * cur_x - px, 2.0 * cur_y - py),
                        None => (cur_x, cur_y),
                    };
                    let (c1x, c1y, c2x, c2y) = quad_to_cubic(cur_x, cur_y, qx, qy, x, y);
                    segs.push(PathSeg::CurveTo(c1x, c1y, c2x, c2y, x, y));
                    (cur_x, cur_y) = (x, y);
                    last_quad_ctrl = Some((qx, qy));
                    last_cubic_ctrl2 = Some((c2x, c2y));
                }
            }
            'A' | 'a' => {
                while let Some((rx, ry, rot, large, sweep, x, y)) = p.next_arc() {
                    let (x, y) = abs(x, y, cur_x, cur_y);
                    let curves = arc_to_cubics(cur_x, cur_y, rx, ry, rot, large, sweep, x, y);
                    last_cubic_ctrl2 = curves.iter().rev().find_map(|seg| match *seg {
                        PathSeg::CurveTo(_, _, x2, y2, _, _) => Some((x2, y2)),
                        _ => None,
                    });
                    segs.extend(curves);
                    (cur_x, cur_y) = (x, y);
                }
                last_quad_ctrl = None;
            }
            'Z' | 'z' => {
                segs.push(PathSeg::Close);
                (cur_x, cur_y) = (start_x, start_y);
                last_cubic_ctrl2 = None;
                last_quad_ctrl = None;
            }
            _ => {}
        }
        // Stray tokens consume nothing; stop instead of spinning.
        if p.i == before {
            break;
        }
    }
    segs
}

fn quad_to_cubic(x0: f32, y0: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> (f32, f32, f32, f32) {
    let c1x = x0 + (2.0 / 3.0) * (x1 - x0);
    let c1y = y0 + (2.0 / 3.0) * (y1 - y0);
    let c2x = x2 + (2.0 / 3.0) * (x1 - x2);
    let c2y = y2 + (2.0 / 3.0) * (y1 - y2);
    (c1x, c1y, c2x, c2y)
}

// Center parameterization from the SVG 1.1 implementation notes.
#[allow(clippy::too_many_arguments)]
fn arc_to_cubics(
    x0: f32,
    y0: f32,
    rx: f32,
    ry: f32,
    x_axis_rotation_deg: f32,
    large_arc: bool,
    sweep: bool,
    x1: f32,
    y1: f32,
) -> Vec<PathSeg> {
    use std::f32::consts::PI;

    let mut rx = rx.abs();
    let mut ry = ry.abs();
    if rx == 0.0 || ry == 0.0 || (x0 == x1 && y0 == y1) {
        return vec![PathSeg::LineTo(x1, y1)];
    }

    let phi = x_axis_rotation_deg.to_radians();
    let sin_phi = libm::sinf(phi);
    let cos_phi = libm::cosf(phi);

    let dx2 = (x0 - x1) / 2.0;
    let dy2 = (y0 - y1) / 2.0;
    let x1p = cos_phi * dx2 + sin_phi * dy2;
    let y1p = -sin_phi * dx2 + cos_phi * dy2;

    // Radii too small for the endpoints are scaled up.
    let lambda = (x1p * x1p) / (rx * rx) + (y1p * y1p) / (ry * ry);
    if lambda > 1.0 {
        let s = libm::sqrtf(lambda);
        rx *= s;
        ry *= s;
    }

    let rx2 = rx * rx;
    let ry2 = ry * ry;
    let num = rx2 * ry2 - rx2 * y1p * y1p - ry2 * x1p * x1p;
    let den = rx2 * y1p * y1p + ry2 * x1p * x1p;
    let coef = if den != 0.0 {
        let sign = if large_arc == sweep { -1.0 } else { 1.0 };
        sign * libm::sqrtf((num / den).max(0.0))
    } else {
        0.0
    };
    let cxp = coef * (rx * y1p / ry);
    let cyp = coef * (-ry * x1p / rx);
    let cx = cos_phi * cxp - sin_phi * cyp + (x0 + x1) / 2.0;
    let cy = sin_phi * cxp + cos_phi * cyp + (y0 + y1) / 2.0;

    fn angle(ux: f32, uy: f32, vx: f32, vy: f32) -> f32 {
        libm::atan2f(ux * vy - uy * vx, ux * vx + uy * vy)
    }

    let ux = (x1p - cxp) / rx;
    let uy = (y1p - cyp) / ry;
    let vx = (-x1p - cxp) / rx;
    let vy = (-y1p - cyp) / ry;
    let mut theta = angle(1.0, 0.0, ux, uy);
    let mut dtheta = angle(ux, uy, vx, vy);
    if !sweep && dtheta > 0.0 {
        dtheta -= 2.0 * PI;
    } else if sweep && dtheta < 0.0 {
        dtheta += 2.0 * PI;
    }

    // At most a quarter turn per segment.
    let count = libm::ceilf(dtheta.abs() / (PI / 2.0)).max(1.0) as usize;
    let delta = dtheta / count as f32;
    let map = |x: f32, y: f32| {
        let (x, y) = (rx * x, ry * y);
        (cx + cos_phi * x - sin_phi * y, cy + sin_phi * x + cos_phi * y)
    };
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let t1 = theta;
        let t2 = theta + delta;
        let k = (4.0 / 3.0) * libm::tanf((t2 - t1) / 4.0);
        let (s1, c1) = (libm::sinf(t1), libm::cosf(t1));
        let (s2, c2) = (libm::sinf(t2), libm::cosf(t2));
        let (c1x, c1y) = map(c1 - k * s1, s1 + k * c1);
        let (c2x, c2y) = map(c2 + k * s2, s2 - k * c2);
        let (ex, ey) = map(c2, s2);
        out.push(PathSeg::CurveTo(c1x, c1y, c2x, c2y, ex, ey));
        theta = t2;
    }
    out
}

struct PathParser<'a> {
    bytes: &'a [u8],
    i: usize,
}

impl<'a> PathParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            i: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.i < self.bytes.len() && matches!(self.bytes[self.i], b' ' | b'\n' | b'\r' | b'\t' | b',') {
            self.i += 1;
        }
    }

    fn next_command_or_number(&mut self, current: &mut char) -> Option<char> {
        self.skip_ws();
        let b = *self.bytes.get(self.i)?;
        if b.is_ascii_alphabetic() {
            *current = b as char;
            self.i += 1;
            return Some(*current);
        }
        // No new command; repeat the previous one.
        Some(*current)
    }

    fn next_number(&mut self) -> Option<f32> {
        self.skip_ws();
        let start = self.i;
        let mut has = false;
        let digits = |p: &mut Self, has: &mut bool| {
            while p.i < p.bytes.len() && p.bytes[p.i].is_ascii_digit() {
                p.i += 1;
                *has = true;
            }
        };
        if self.i < self.bytes.len() && matches!(self.bytes[self.i], b'+' | b'-') {
            self.i += 1;
        }
        digits(&mut *self, &mut has);
        if self.i < self.bytes.len() && self.bytes[self.i] == b'.' {
            self.i += 1;
            digits(&mut *self, &mut has);
        }
        if has && self.i < self.bytes.len() && matches!(self.bytes[self.i], b'e' | b'E') {
            self.i += 1;
            if self.i < self.bytes.len() && matches!(self.bytes[self.i], b'+' | b'-') {
                self.i += 1;
            }
            let mut exp = false;
            digits(&mut *self, &mut exp);
        }
        if !has {
            self.i = start;
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.i])
            .ok()?
            .parse::<f32>()
            .ok()
    }

    fn next_numbers<const N: usize>(&mut self) -> Option<[f32; N]> {
        let start = self.i;
        let mut out = [0.0f32; N];
        for slot in out.iter_mut() {
            match self.next_number() {
                Some(v) => *slot = v,
                None => {
                    self.i = start;
                    return None;
                }
            }
        }
        Some(out)
    }

    fn next_pair(&mut self) -> Option<(f32, f32)> {
        self.next_numbers::<2>().map(|[x, y]| (x, y))
    }

    // Flags may be packed without separators ("01").
    fn next_flag(&mut self) -> Option<bool> {
        self.skip_ws();
        match self.bytes.get(self.i)? {
            b'0' => {
                self.i += 1;
                Some(false)
            }
            b'1' => {
                self.i += 1;
                Some(true)
            }
            _ => None,
        }
    }

    fn next_arc(&mut self) -> Option<(f32, f32, f32, bool, bool, f32, f32)> {
        let start = self.i;
        let arc = (|| {
            let [rx, ry, rot] = self.next_numbers::<3>()?;
            let large = self.next_flag()?;
            let sweep = self.next_flag()?;
            let (x, y) = self.next_pair()?;
            Some((rx, ry, rot, large, sweep, x, y))
        })();
        if arc.is_none() {
            self.i = start;
        }
        arc
    }
}
