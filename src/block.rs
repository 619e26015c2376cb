use crate::canvas::{Canvas, NamedRegion};
use crate::columns::AbsoluteColumnsBlock;
use crate::context::RenderContext;
use crate::deferred::Drawer;
use crate::error::{BlockPrintError, Result};
use crate::expr::{Expr, Params, Scope};
use crate::fragment::{FlowTarget, Fragment, TextFragment, create_placeholder};
use crate::image::ConfigurableImageBlock;
use crate::types::{HorizontalAlign, Pt, Rect};

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    param: String,
    negate: bool,
}

impl Condition {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (negate, param) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, trimmed),
        };
        if param.is_empty() {
            return Err(BlockPrintError::invalid_value("condition", raw));
        }
        Ok(Self {
            param: param.to_string(),
            negate,
        })
    }

    pub fn is_met(&self, scope: &Scope<'_>) -> bool {
        let set = scope
            .lookup(&self.param)
            .map(|value| value.is_truthy())
            .unwrap_or(false);
        set != self.negate
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockCommon {
    pub spacing_after: f32,
    pub align: HorizontalAlign,
    pub condition: Option<Condition>,
}

impl BlockCommon {
    pub fn with_spacing_after(mut self, spacing: f32) -> Self {
        self.spacing_after = spacing;
        self
    }

    pub fn with_align(mut self, align: HorizontalAlign) -> Self {
        self.align = align;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn spacing_after_pt(&self) -> Pt {
        Pt::from_f32(self.spacing_after)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.spacing_after.is_finite() || self.spacing_after < 0.0 {
            return Err(BlockPrintError::invalid_value(
                "spacingAfter",
                self.spacing_after.to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Block {
    Text(TextBlock),
    Image(ConfigurableImageBlock),
    Columns(AbsoluteColumnsBlock),
    Map(MapBlock),
}

impl Block {
    pub fn common(&self) -> &BlockCommon {
        match self {
            Block::Text(b) => &b.common,
            Block::Image(b) => b.common(),
            Block::Columns(b) => b.common(),
            Block::Map(b) => &b.common,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.common().validate()?;
        match self {
            Block::Text(_) => Ok(()),
            Block::Image(b) => b.validate(),
            Block::Columns(b) => b.validate(),
            Block::Map(b) => b.validate(),
        }
    }

    pub fn is_visible(&self, scope: &Scope<'_>) -> bool {
        self.common()
            .condition
            .as_ref()
            .is_none_or(|condition| condition.is_met(scope))
    }

    pub fn render(&self, params: &Params, target: &mut FlowTarget, ctx: &mut RenderContext) -> Result<()> {
        if !self.is_visible(&ctx.scope(params)) {
            return Ok(());
        }
        match self {
            Block::Text(b) => b.render(params, target, ctx),
            Block::Image(b) => b.render(params, target, ctx),
            Block::Columns(b) => b.render(params, target, ctx),
            Block::Map(b) => b.render(params, target, ctx),
        }
    }

    pub fn is_absolute(&self) -> bool {
        match self {
            Block::Columns(b) => b.is_absolute(),
            _ => false,
        }
    }

    pub fn locate_named_sub_block(&self, name: Option<&str>) -> Option<&MapBlock> {
        match self {
            Block::Map(map) if map.matches(name) => Some(map),
            Block::Columns(columns) => columns
                .items()
                .iter()
                .find_map(|item| item.locate_named_sub_block(name)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextBlock {
    common: BlockCommon,
    text: Expr,
    font_size: f32,
}

impl TextBlock {
    pub fn new(text: &str) -> Result<Self> {
        Ok(Self {
            common: BlockCommon::default(),
            text: Expr::parse_field("text", text)?,
            font_size: 12.0,
        })
    }

    pub fn with_font_size(mut self, font_size: f32) -> Self {
        self.font_size = font_size;
        self
    }

    pub fn with_common(mut self, common: BlockCommon) -> Self {
        self.common = common;
        self
    }

    fn render(&self, params: &Params, target: &mut FlowTarget, ctx: &mut RenderContext) -> Result<()> {
        let text = self.text.resolve(&ctx.scope(params), None)?;
        target.add(Fragment::Text(TextFragment {
            text,
            font_size: Pt::from_f32(self.font_size),
            align: self.common.align,
            spacing_after: self.common.spacing_after_pt(),
        }));
        Ok(())
    }
}

impl From<TextBlock> for Block {
    fn from(block: TextBlock) -> Self {
        Block::Text(block)
    }
}

#[derive(Debug, Clone)]
pub struct MapBlock {
    common: BlockCommon,
    name: Option<String>,
    width: Expr,
    height: Expr,
}

impl MapBlock {
    pub fn new(name: Option<&str>, width: &str, height: &str) -> Result<Self> {
        Ok(Self {
            common: BlockCommon::default(),
            name: name.map(str::to_string),
            width: Expr::parse_field("width", width)?,
            height: Expr::parse_field("height", height)?,
        })
    }

    pub fn with_common(mut self, common: BlockCommon) -> Self {
        self.common = common;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn matches(&self, name: Option<&str>) -> bool {
        name.is_none_or(|wanted| self.name.as_deref() == Some(wanted))
    }

    fn validate(&self) -> Result<()> {
        if self.width.source().trim().is_empty() {
            return Err(BlockPrintError::invalid_value("width", "null"));
        }
        if self.height.source().trim().is_empty() {
            return Err(BlockPrintError::invalid_value("height", "null"));
        }
        Ok(())
    }

    fn render(&self, params: &Params, target: &mut FlowTarget, ctx: &mut RenderContext) -> Result<()> {
        let scope = ctx.scope(params);
        let width = self.width.resolve_number("width", &scope)?;
        let height = self.height.resolve_number("height", &scope)?;
        let drawer = ViewportDrawer {
            name: self.name.clone(),
        };
        let fragment = create_placeholder(
            Pt::from_f32(width),
            Pt::from_f32(height),
            self.common.spacing_after_pt(),
            Box::new(drawer),
            self.common.align,
            ctx,
        );
        target.add(fragment);
        Ok(())
    }
}

impl From<MapBlock> for Block {
    fn from(block: MapBlock) -> Self {
        Block::Map(block)
    }
}

#[derive(Debug)]
struct ViewportDrawer {
    name: Option<String>,
}

impl Drawer for ViewportDrawer {
    fn paint(&self, canvas: &mut Canvas, placement: Option<Rect>) -> Result<()> {
        let Some(rect) = placement else {
            return Ok(());
        };
        canvas.add_region(NamedRegion {
            name: self.name.clone(),
            rect,
        });
        Ok(())
    }
}
