use crate::block::Block;
use crate::canvas::Canvas;
use crate::context::RenderContext;
use crate::error::{BlockPrintError, Result};
use crate::expr::Params;
use crate::fragment::{FlowTarget, Fragment};
use crate::types::{Color, HorizontalAlign, Pt, Size};
use std::ops::{Bound, RangeBounds};

fn table_debug_enabled() -> bool {
    static ENABLED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var("BLOCKPRINT_TABLE_DEBUG")
            .ok()
            .map(|v| {
                let v = v.trim();
                v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
            })
            .unwrap_or(false)
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    pub border_width: f32,
    pub border_color: Color,
    pub cell_padding: f32,
    pub background: Option<Color>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            border_width: 0.0,
            border_color: Color::BLACK,
            cell_padding: 0.0,
            background: None,
        }
    }
}

impl TableConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.border_width.is_finite() || self.border_width < 0.0 {
            return Err(BlockPrintError::invalid_value(
                "config.borderWidth",
                self.border_width.to_string(),
            ));
        }
        if !self.cell_padding.is_finite() || self.cell_padding < 0.0 {
            return Err(BlockPrintError::invalid_value(
                "config.cellPadding",
                self.cell_padding.to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableCell {
    pub content: Vec<Fragment>,
}

impl TableCell {
    fn height(&self, width: Pt) -> Pt {
        self.content
            .iter()
            .map(|f| f.wrap(width).height + f.spacing_after())
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    columns: usize,
    widths: Option<Vec<f32>>,
    total_width: Option<Pt>,
    spacing_after: Pt,
    align: HorizontalAlign,
    config: TableConfig,
    cells: Vec<TableCell>,
}

impl Table {
    pub fn new(columns: usize, config: TableConfig) -> Self {
        Self {
            columns: columns.max(1),
            widths: None,
            total_width: None,
            spacing_after: Pt::ZERO,
            align: HorizontalAlign::default(),
            config,
            cells: Vec::new(),
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn add_cell(&mut self, content: Vec<Fragment>) {
        self.cells.push(TableCell { content });
    }

    pub fn complete_row(&mut self) {
        while self.cells.len() % self.columns != 0 {
            self.cells.push(TableCell::default());
        }
    }

    pub fn rows(&self) -> usize {
        self.cells.len().div_ceil(self.columns)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&TableCell> {
        if column >= self.columns {
            return None;
        }
        self.cells.get(row * self.columns + column)
    }

    pub fn set_widths(&mut self, widths: &[u32]) -> Result<()> {
        if widths.len() != self.columns {
            return Err(BlockPrintError::invalid_value(
                "widths",
                format!("{widths:?} for {} columns", self.columns),
            ));
        }
        self.widths = Some(widths.iter().map(|w| *w as f32).collect());
        Ok(())
    }

    pub fn widths(&self) -> Option<&[f32]> {
        self.widths.as_deref()
    }

    pub fn lock_width(&mut self, width: Pt) {
        self.total_width = Some(width.max(Pt::ZERO));
    }

    pub fn total_width(&self) -> Option<Pt> {
        self.total_width
    }

    pub fn set_spacing_after(&mut self, spacing: Pt) {
        self.spacing_after = spacing;
    }

    pub fn spacing_after(&self) -> Pt {
        self.spacing_after
    }

    pub fn set_align(&mut self, align: HorizontalAlign) {
        self.align = align;
    }

    pub fn align(&self) -> HorizontalAlign {
        self.align
    }

    pub fn column_widths(&self, avail_width: Pt) -> Vec<Pt> {
        let total = self.total_width.unwrap_or(avail_width);
        match &self.widths {
            Some(weights) => total.split_by(weights),
            None => total.split_by(&vec![1.0; self.columns]),
        }
    }

    fn padding(&self) -> Pt {
        Pt::from_f32(self.config.cell_padding)
    }

    fn row_heights(&self, column_widths: &[Pt]) -> Vec<Pt> {
        let padding = self.padding();
        self.cells
            .chunks(self.columns)
            .map(|row| {
                let content = row
                    .iter()
                    .zip(column_widths)
                    .map(|(cell, w)| cell.height((*w - padding - padding).max(Pt::ZERO)))
                    .fold(Pt::ZERO, Pt::max);
                content + padding + padding
            })
            .collect()
    }

    pub fn wrap(&self, avail_width: Pt) -> Size {
        let column_widths = self.column_widths(avail_width);
        Size {
            width: column_widths.iter().copied().sum(),
            height: self.row_heights(&column_widths).into_iter().sum(),
        }
    }

    // Bypasses any frame; returns the y coordinate below the last written row.
    pub fn write_selected_rows(
        &self,
        rows: impl RangeBounds<usize>,
        x: Pt,
        top: Pt,
        canvas: &mut Canvas,
    ) -> Pt {
        self.write_rows(rows, x, top, self.total_width.unwrap_or(Pt::ZERO), canvas)
    }

    pub(crate) fn write_rows(
        &self,
        rows: impl RangeBounds<usize>,
        x: Pt,
        top: Pt,
        avail_width: Pt,
        canvas: &mut Canvas,
    ) -> Pt {
        let column_widths = self.column_widths(avail_width);
        let heights = self.row_heights(&column_widths);
        let start = match rows.start_bound() {
            Bound::Included(s) => *s,
            Bound::Excluded(s) => s + 1,
            Bound::Unbounded => 0,
        };
        let end = match rows.end_bound() {
            Bound::Included(e) => e + 1,
            Bound::Excluded(e) => *e,
            Bound::Unbounded => heights.len(),
        }
        .min(heights.len());

        if table_debug_enabled() {
            log::debug!(
                "table write rows {start}..{end} at ({}, {}) widths={:?} heights={:?}",
                x.to_f32(),
                top.to_f32(),
                column_widths.iter().map(|w| w.to_f32()).collect::<Vec<_>>(),
                heights.iter().map(|h| h.to_f32()).collect::<Vec<_>>(),
            );
        }

        let padding = self.padding();
        let mut y = top;
        for row in start..end {
            let height = heights[row];
            let bottom = y - height;
            let mut cell_x = x;
            for (column, width) in column_widths.iter().copied().enumerate() {
                if let Some(background) = self.config.background {
                    canvas.set_fill_color(background);
                    canvas.draw_rect(cell_x, bottom, width, height);
                }
                if let Some(cell) = self.cell(row, column) {
                    let inner = (width - padding - padding).max(Pt::ZERO);
                    let mut cursor = y - padding;
                    for fragment in &cell.content {
                        let placed = fragment.draw(canvas, cell_x + padding, cursor, inner);
                        cursor -= placed.height + fragment.spacing_after();
                    }
                }
                if self.config.border_width > 0.0 {
                    self.stroke_cell(canvas, cell_x, bottom, width, height);
                }
                cell_x += width;
            }
            y = bottom;
        }
        y
    }

    fn stroke_cell(&self, canvas: &mut Canvas, x: Pt, y: Pt, width: Pt, height: Pt) {
        canvas.set_stroke_color(self.config.border_color);
        canvas.set_line_width(Pt::from_f32(self.config.border_width));
        canvas.move_to(x, y);
        canvas.line_to(x + width, y);
        canvas.line_to(x + width, y + height);
        canvas.line_to(x, y + height);
        canvas.close_path();
        canvas.stroke();
    }
}

pub trait TableBuilder: Send + Sync {
    fn build_table(
        &self,
        items: &[Block],
        params: &Params,
        ctx: &mut RenderContext,
        nb_columns: Option<usize>,
        config: Option<&TableConfig>,
    ) -> Result<Option<Table>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTableBuilder;

impl TableBuilder for DefaultTableBuilder {
    fn build_table(
        &self,
        items: &[Block],
        params: &Params,
        ctx: &mut RenderContext,
        nb_columns: Option<usize>,
        config: Option<&TableConfig>,
    ) -> Result<Option<Table>> {
        let visible: Vec<&Block> = items
            .iter()
            .filter(|item| item.is_visible(&ctx.scope(params)))
            .collect();
        if visible.is_empty() {
            return Ok(None);
        }
        // Hidden items leave trailing empty cells so configured widths still line up.
        let columns = nb_columns.unwrap_or(items.len());
        let mut table = Table::new(columns, config.cloned().unwrap_or_default());
        for item in visible {
            let mut target = FlowTarget::new();
            item.render(params, &mut target, ctx)?;
            table.add_cell(target.into_fragments());
        }
        table.complete_row();
        if table_debug_enabled() {
            log::debug!(
                "built table: {} columns, {} rows",
                table.columns(),
                table.rows()
            );
        }
        Ok(Some(table))
    }
}
