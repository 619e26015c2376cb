use crate::assets::{Asset, Locator};
use crate::block::{Block, BlockCommon};
use crate::canvas::{Canvas, DrawingSurface};
use crate::context::RenderContext;
use crate::deferred::Drawer;
use crate::error::{BlockPrintError, Result};
use crate::expr::{Expr, Params};
use crate::fragment::{FlowTarget, Fragment, ImageFragment, create_placeholder};
use crate::svg::{PageFormat, VectorProgram};
use crate::types::{Pt, Rect};
use ::image::GenericImageView;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ConfigurableImageBlock {
    common: BlockCommon,
    url: Expr,
    max_width: Expr,
    max_height: Expr,
    // Degrees.
    rotation: Expr,
}

#[derive(Debug, Default)]
pub struct ConfigurableImageBuilder {
    common: BlockCommon,
    url: Option<String>,
    max_width: Option<String>,
    max_height: Option<String>,
    rotation: Option<String>,
}

impl ConfigurableImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn common(mut self, common: BlockCommon) -> Self {
        self.common = common;
        self
    }

    pub fn url(mut self, template: impl Into<String>) -> Self {
        self.url = Some(template.into());
        self
    }

    pub fn max_width(mut self, template: impl Into<String>) -> Self {
        self.max_width = Some(template.into());
        self
    }

    pub fn max_height(mut self, template: impl Into<String>) -> Self {
        self.max_height = Some(template.into());
        self
    }

    pub fn rotation(mut self, template: impl Into<String>) -> Self {
        self.rotation = Some(template.into());
        self
    }

    pub fn build(self) -> Result<ConfigurableImageBlock> {
        let required = |field: &str, raw: Option<String>| match raw {
            Some(raw) if !raw.trim().is_empty() => Expr::parse_field(field, raw),
            _ => Err(BlockPrintError::invalid_value(field, "null")),
        };
        let block = ConfigurableImageBlock {
            common: self.common,
            url: required("url", self.url)?,
            max_width: required("maxWidth", self.max_width)?,
            max_height: required("maxHeight", self.max_height)?,
            rotation: Expr::parse_field(
                "rotation",
                self.rotation.unwrap_or_else(|| "0".to_string()),
            )?,
        };
        block.validate()?;
        Ok(block)
    }
}

impl ConfigurableImageBlock {
    pub fn builder() -> ConfigurableImageBuilder {
        ConfigurableImageBuilder::new()
    }

    pub fn common(&self) -> &BlockCommon {
        &self.common
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_static() {
            Locator::parse(self.url.source())?;
        }
        Ok(())
    }

    pub fn render(&self, params: &Params, target: &mut FlowTarget, ctx: &mut RenderContext) -> Result<()> {
        let scope = ctx.scope(params);
        let locator = Locator::parse(&self.url.resolve(&scope, None)?)?;
        let max_width = Pt::from_f32(self.max_width.resolve_number("maxWidth", &scope)?);
        let max_height = Pt::from_f32(self.max_height.resolve_number("maxHeight", &scope)?);
        let rotation = self.rotation.resolve_number("rotation", &scope)?.to_radians();

        if locator.is_vector() {
            let fragment = self.vector_placeholder(ctx, &locator, max_width, max_height, rotation)?;
            target.add(fragment);
            return Ok(());
        }

        let mut image = create_image_fragment(ctx, max_width, max_height, &locator, rotation)?;
        image.align = self.common.align;
        image.spacing_after = self.common.spacing_after_pt();
        target.add(Fragment::Image(image));
        Ok(())
    }

    fn vector_placeholder(
        &self,
        ctx: &mut RenderContext,
        locator: &Locator,
        width: Pt,
        height: Pt,
        rotation: f32,
    ) -> Result<Fragment> {
        let services = ctx.services();
        let program = services
            .transcoder
            .transcode(locator, services.loader.as_ref(), &services.transcode)?;
        let drawer = VectorDrawer {
            rotation,
            program,
            format: PageFormat::new(width, height),
            width,
            height,
        };
        Ok(create_placeholder(
            width,
            height,
            self.common.spacing_after_pt(),
            Box::new(drawer),
            self.common.align,
            ctx,
        ))
    }
}

impl From<ConfigurableImageBlock> for Block {
    fn from(block: ConfigurableImageBlock) -> Self {
        Block::Image(block)
    }
}

// A zero bound leaves that axis unconstrained.
pub fn create_image_fragment(
    ctx: &mut RenderContext,
    max_width: Pt,
    max_height: Pt,
    locator: &Locator,
    rotation: f32,
) -> Result<ImageFragment> {
    let bytes = ctx.services().loader.load(locator)?;
    let decoded = ::image::load_from_memory(&bytes)
        .map_err(|err| BlockPrintError::Resource(format!("{locator}: {err}")))?;
    let (w, h) = decoded.dimensions();
    if w == 0 || h == 0 {
        return Err(BlockPrintError::Resource(format!("{locator}: empty image")));
    }
    let (w, h) = (w as f32, h as f32);
    let scale = [(max_width.to_f32(), w), (max_height.to_f32(), h)]
        .into_iter()
        .filter(|(bound, _)| *bound > 0.0)
        .map(|(bound, natural)| bound / natural)
        .reduce(f32::min)
        .unwrap_or(1.0);

    let asset = Asset::image(bytes, Some(locator.to_string()));
    let resource_id = asset.name.clone();
    ctx.add_asset(asset);
    Ok(ImageFragment::new(
        resource_id,
        Pt::from_f32(w * scale),
        Pt::from_f32(h * scale),
        rotation,
    ))
}

#[derive(Debug)]
struct VectorDrawer {
    rotation: f32,
    program: Arc<dyn VectorProgram>,
    format: PageFormat,
    width: Pt,
    height: Pt,
}

impl Drawer for VectorDrawer {
    fn paint(&self, canvas: &mut Canvas, placement: Option<Rect>) -> Result<()> {
        let Some(rect) = placement else {
            return Ok(());
        };
        let mut guard = canvas.saved_state();
        guard.translate(rect.x, rect.y);
        if self.rotation != 0.0 {
            let (cx, cy) = (self.width / 2, self.height / 2);
            guard.translate(cx, cy);
            guard.rotate(self.rotation);
            guard.translate(-cx, -cy);
        }
        let mut surface = DrawingSurface::acquire(&mut guard, self.width, self.height);
        self.program.print(&mut surface, &self.format)
    }

    fn kind(&self) -> &'static str {
        "vector"
    }
}
