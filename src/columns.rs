use crate::block::{Block, BlockCommon};
use crate::canvas::Canvas;
use crate::context::{DrawEnv, RenderContext};
use crate::deferred::Drawer;
use crate::error::{BlockPrintError, Result};
use crate::expr::{Expr, Params};
use crate::fragment::{FlowTarget, Fragment};
use crate::table::{Table, TableConfig};
use crate::types::{Pt, Rect};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AbsoluteColumnsBlock {
    common: BlockCommon,
    items: Arc<Vec<Block>>,
    widths: Option<Vec<u32>>,
    absolute_x: Option<Expr>,
    absolute_y: Option<Expr>,
    width: Option<Expr>,
    nb_columns: Option<usize>,
    config: Option<TableConfig>,
}

#[derive(Debug, Default)]
pub struct AbsoluteColumnsBuilder {
    common: BlockCommon,
    items: Vec<Block>,
    widths: Option<Vec<u32>>,
    absolute_x: Option<String>,
    absolute_y: Option<String>,
    width: Option<String>,
    nb_columns: Option<usize>,
    config: Option<TableConfig>,
}

impl AbsoluteColumnsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn common(mut self, common: BlockCommon) -> Self {
        self.common = common;
        self
    }

    pub fn item(mut self, item: impl Into<Block>) -> Self {
        self.items.push(item.into());
        self
    }

    pub fn items(mut self, items: Vec<Block>) -> Self {
        self.items = items;
        self
    }

    pub fn widths(mut self, widths: Vec<u32>) -> Self {
        self.widths = Some(widths);
        self
    }

    pub fn absolute_x(mut self, template: impl Into<String>) -> Self {
        self.absolute_x = Some(template.into());
        self
    }

    pub fn absolute_y(mut self, template: impl Into<String>) -> Self {
        self.absolute_y = Some(template.into());
        self
    }

    pub fn width(mut self, template: impl Into<String>) -> Self {
        self.width = Some(template.into());
        self
    }

    pub fn nb_columns(mut self, nb_columns: usize) -> Self {
        self.nb_columns = Some(nb_columns);
        self
    }

    pub fn config(mut self, config: TableConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<AbsoluteColumnsBlock> {
        let parse = |field: &str, raw: Option<String>| {
            raw.map(|raw| Expr::parse_field(field, raw)).transpose()
        };
        let block = AbsoluteColumnsBlock {
            common: self.common,
            items: Arc::new(self.items),
            widths: self.widths,
            absolute_x: parse("absoluteX", self.absolute_x)?,
            absolute_y: parse("absoluteY", self.absolute_y)?,
            width: parse("width", self.width)?,
            nb_columns: self.nb_columns,
            config: self.config,
        };
        block.validate()?;
        Ok(block)
    }
}

impl AbsoluteColumnsBlock {
    pub fn builder() -> AbsoluteColumnsBuilder {
        AbsoluteColumnsBuilder::new()
    }

    pub fn common(&self) -> &BlockCommon {
        &self.common
    }

    pub fn items(&self) -> &[Block] {
        &self.items
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute_x.is_some() && self.absolute_y.is_some() && self.width.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(BlockPrintError::invalid_value("items", "[]"));
        }
        let set = [&self.absolute_x, &self.absolute_y, &self.width]
            .iter()
            .filter(|field| field.is_some())
            .count();
        if set != 0 && set != 3 {
            return Err(BlockPrintError::invalid_value(
                "absoluteX, absoluteY or width",
                "all of them must be defined or none",
            ));
        }
        for item in self.items.iter() {
            item.validate()?;
            if item.is_absolute() {
                return Err(BlockPrintError::invalid_value(
                    "items",
                    "Cannot put an absolute block in a !columns or !table block",
                ));
            }
        }
        if self.nb_columns == Some(0) {
            return Err(BlockPrintError::invalid_value("nbColumns", "0"));
        }
        if let Some(widths) = &self.widths {
            let columns = self.nb_columns.unwrap_or(self.items.len());
            if widths.len() != columns {
                return Err(BlockPrintError::invalid_value("widths", format!("{widths:?}")));
            }
        }
        if let Some(config) = &self.config {
            config.validate()?;
        }
        Ok(())
    }

    pub fn render(&self, params: &Params, target: &mut FlowTarget, ctx: &mut RenderContext) -> Result<()> {
        if let (Some(x), Some(y), Some(width)) = (&self.absolute_x, &self.absolute_y, &self.width) {
            let drawer = AbsoluteTableDrawer {
                items: Arc::clone(&self.items),
                params: params.clone(),
                env: ctx.env(),
                absolute_x: x.clone(),
                absolute_y: y.clone(),
                width: width.clone(),
                widths: self.widths.clone(),
                nb_columns: self.nb_columns,
                config: self.config.clone(),
            };
            ctx.register_absolute(Box::new(drawer));
            return Ok(());
        }

        let builder = Arc::clone(&ctx.services().table_builder);
        let Some(mut table) = builder.build_table(
            &self.items,
            params,
            ctx,
            self.nb_columns,
            self.config.as_ref(),
        )?
        else {
            return Ok(());
        };
        if let Some(widths) = &self.widths {
            table.set_widths(widths)?;
        }
        table.set_spacing_after(self.common.spacing_after_pt());
        table.set_align(self.common.align);
        target.add(Fragment::Table(table));
        Ok(())
    }
}

impl From<AbsoluteColumnsBlock> for Block {
    fn from(block: AbsoluteColumnsBlock) -> Self {
        Block::Columns(block)
    }
}

// Coordinates stay templates until paint time.
#[derive(Debug)]
struct AbsoluteTableDrawer {
    items: Arc<Vec<Block>>,
    params: Params,
    env: DrawEnv,
    absolute_x: Expr,
    absolute_y: Expr,
    width: Expr,
    widths: Option<Vec<u32>>,
    nb_columns: Option<usize>,
    config: Option<TableConfig>,
}

impl AbsoluteTableDrawer {
    fn build(&self, ctx: &mut RenderContext) -> Result<Option<Table>> {
        let builder = Arc::clone(&self.env.services().table_builder);
        builder.build_table(
            &self.items,
            &self.params,
            ctx,
            self.nb_columns,
            self.config.as_ref(),
        )
    }
}

impl Drawer for AbsoluteTableDrawer {
    fn paint(&self, canvas: &mut Canvas, _placement: Option<Rect>) -> Result<()> {
        let mut nested = self.env.context();
        let Some(mut table) = self.build(&mut nested)? else {
            return Ok(());
        };
        let scope = nested.scope(&self.params);
        let width = self.width.resolve_number("width", &scope)?;
        table.lock_width(Pt::from_f32(width));
        if let Some(widths) = &self.widths {
            table.set_widths(widths)?;
        }
        let x = self.absolute_x.resolve_number("absoluteX", &scope)?;
        let y = self.absolute_y.resolve_number("absoluteY", &scope)?;
        table.write_selected_rows(0.., Pt::from_f32(x), Pt::from_f32(y), canvas);

        // Children that deferred their own drawing (vector images, map viewports) were
        // placed by the rows just written.
        let output = nested.into_output();
        canvas.add_assets(output.assets);
        output
            .registry
            .replay(canvas, self.env.services().debug.as_ref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::TextBlock;
    use crate::canvas::Command;
    use crate::context::Services;
    use crate::error::ErrorKind;
    use crate::types::Size;

    fn text(s: &str) -> Block {
        TextBlock::new(s).unwrap().into()
    }

    fn ctx() -> RenderContext {
        RenderContext::new(
            Arc::new(Services::default()),
            Params::new(),
            Size::a4(),
            Pt::from_f32(500.0),
        )
    }

    fn absolute(x: &str, y: &str, w: &str) -> AbsoluteColumnsBlock {
        AbsoluteColumnsBlock::builder()
            .item(text("A"))
            .item(text("B"))
            .absolute_x(x)
            .absolute_y(y)
            .width(w)
            .build()
            .unwrap()
    }

    #[test]
    fn absolute_requires_all_three_coordinates() {
        let combos: [(bool, bool, bool); 8] = [
            (false, false, false),
            (true, false, false),
            (false, true, false),
            (false, false, true),
            (true, true, false),
            (true, false, true),
            (false, true, true),
            (true, true, true),
        ];
        for (x, y, w) in combos {
            let mut builder = AbsoluteColumnsBlock::builder().item(text("A"));
            if x {
                builder = builder.absolute_x("1");
            }
            if y {
                builder = builder.absolute_y("2");
            }
            if w {
                builder = builder.width("3");
            }
            let set = [x, y, w].iter().filter(|v| **v).count();
            match builder.build() {
                Ok(block) => {
                    assert!(set == 0 || set == 3);
                    assert_eq!(block.is_absolute(), set == 3);
                }
                Err(err) => {
                    assert!(set == 1 || set == 2);
                    assert!(matches!(
                        err,
                        BlockPrintError::InvalidValue { ref field, .. }
                            if field == "absoluteX, absoluteY or width"
                    ));
                }
            }
        }
    }

    #[test]
    fn rejects_empty_items() {
        let err = AbsoluteColumnsBlock::builder().build().unwrap_err();
        assert_eq!(err.to_string(), "invalid value for items: []");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn rejects_nested_absolute_blocks() {
        let inner = absolute("1", "2", "3");
        let err = AbsoluteColumnsBlock::builder()
            .item(inner)
            .build()
            .unwrap_err();
        assert!(matches!(err, BlockPrintError::InvalidValue { ref field, .. } if field == "items"));
    }

    #[test]
    fn rejects_mismatched_widths() {
        let err = AbsoluteColumnsBlock::builder()
            .item(text("A"))
            .item(text("B"))
            .widths(vec![1, 2, 3])
            .build()
            .unwrap_err();
        assert!(matches!(err, BlockPrintError::InvalidValue { ref field, .. } if field == "widths"));
    }

    #[test]
    fn flow_mode_appends_one_table() {
        let block = AbsoluteColumnsBlock::builder()
            .item(text("A"))
            .item(text("B"))
            .widths(vec![30, 70])
            .common(BlockCommon::default().with_spacing_after(4.0))
            .build()
            .unwrap();
        assert!(!block.is_absolute());
        let mut ctx = ctx();
        let mut target = FlowTarget::new();
        block.render(&Params::new(), &mut target, &mut ctx).unwrap();
        assert_eq!(target.len(), 1);
        assert!(ctx.registry().is_empty());
        let Some(Fragment::Table(table)) = target.iter().next() else {
            panic!("expected a table");
        };
        assert_eq!(table.widths(), Some(&[30.0, 70.0][..]));
        assert_eq!(table.spacing_after(), Pt::from_f32(4.0));
        assert_eq!(
            table.column_widths(Pt::from_f32(100.0)),
            vec![Pt::from_f32(30.0), Pt::from_f32(70.0)]
        );
    }

    #[test]
    fn absolute_mode_defers_and_resolves_at_paint_time() {
        let block = absolute("10", "${x}", "200");
        assert!(block.is_absolute());
        let mut ctx = ctx();
        let mut target = FlowTarget::new();
        let params = Params::new().with("x", "42.5");
        block.render(&params, &mut target, &mut ctx).unwrap();
        assert!(target.is_empty());
        assert_eq!(ctx.registry().len(), 1);

        let mut canvas = Canvas::new(Size::a4());
        let output = ctx.into_output();
        output.registry.replay(&mut canvas, None).unwrap();
        let strings: Vec<(Pt, Pt)> = canvas
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::DrawString { x, y, .. } => Some((*x, *y)),
                _ => None,
            })
            .collect();
        // Two columns of 100pt each, first row top at y = 42.5, 12pt font.
        assert_eq!(
            strings,
            vec![
                (Pt::from_f32(10.0), Pt::from_f32(30.5)),
                (Pt::from_f32(110.0), Pt::from_f32(30.5)),
            ]
        );
    }

    #[test]
    fn malformed_width_names_the_field() {
        let block = absolute("0", "0", "abc");
        let mut ctx = ctx();
        block
            .render(&Params::new(), &mut FlowTarget::new(), &mut ctx)
            .unwrap();
        let mut canvas = Canvas::new(Size::a4());
        let err = ctx
            .into_output()
            .registry
            .replay(&mut canvas, None)
            .unwrap_err();
        match err {
            BlockPrintError::NotNumeric { field, value } => {
                assert_eq!(field, "width");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unresolved_coordinate_fails_at_paint_time() {
        let block = absolute("${missing}", "0", "100");
        let mut ctx = ctx();
        block
            .render(&Params::new(), &mut FlowTarget::new(), &mut ctx)
            .unwrap();
        let mut canvas = Canvas::new(Size::a4());
        let err = ctx
            .into_output()
            .registry
            .replay(&mut canvas, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Evaluation);
    }

    #[test]
    fn malformed_coordinate_template_names_the_field() {
        let err = AbsoluteColumnsBlock::builder()
            .item(text("A"))
            .absolute_x("${x")
            .absolute_y("1")
            .width("1")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        match err {
            BlockPrintError::MalformedTemplate { field, template, .. } => {
                assert_eq!(field, "absoluteX");
                assert_eq!(template, "${x");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn width_beyond_f32_range_fails_at_paint_time() {
        let block = absolute("0", "0", "1e39");
        let mut ctx = ctx();
        block
            .render(&Params::new(), &mut FlowTarget::new(), &mut ctx)
            .unwrap();
        let mut canvas = Canvas::new(Size::a4());
        let err = ctx
            .into_output()
            .registry
            .replay(&mut canvas, None)
            .unwrap_err();
        assert!(matches!(
            err,
            BlockPrintError::NotNumeric { ref field, ref value } if field == "width" && value == "1e39"
        ));
        assert!(!canvas
            .commands()
            .iter()
            .any(|c| matches!(c, Command::DrawString { .. })));
    }

    #[test]
    fn build_rejects_invalid_table_config() {
        let err = AbsoluteColumnsBlock::builder()
            .item(text("A"))
            .config(TableConfig {
                cell_padding: -1.0,
                ..TableConfig::default()
            })
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "invalid value for config.cellPadding: -1");
    }
}
