use crate::block::Block;
use crate::canvas::{Canvas, Document};
use crate::context::{RenderContext, Services};
use crate::error::Result;
use crate::expr::Params;
use crate::fragment::FlowTarget;
use crate::frame::Frame;
use crate::metrics::{DocumentMetrics, PageMetrics};
use crate::types::{Margins, Size};
use std::sync::Arc;
use std::time::Instant;

pub struct DocTemplate {
    page_size: Size,
    margins: Margins,
    blocks: Arc<Vec<Block>>,
    services: Arc<Services>,
    globals: Params,
}

impl DocTemplate {
    pub fn new(
        page_size: Size,
        margins: Margins,
        blocks: Arc<Vec<Block>>,
        services: Arc<Services>,
        globals: Params,
    ) -> Self {
        Self {
            page_size,
            margins,
            blocks,
            services,
            globals,
        }
    }

    pub fn build(&self, pages: &[Params]) -> Result<Document> {
        Ok(self.build_with_metrics(pages)?.0)
    }

    pub fn build_with_metrics(&self, pages: &[Params]) -> Result<(Document, DocumentMetrics)> {
        let result = self.render_document(pages);
        self.emit_summary("document");
        result
    }

    pub(crate) fn emit_summary(&self, context: &str) {
        if let Some(logger) = self.services.debug.as_ref() {
            logger.emit_summary(context);
            logger.flush();
        }
    }

    // Counters accumulate in the shared logger until the caller emits a summary.
    // An empty `pages` slice renders a single page with no request parameters.
    pub(crate) fn render_document(&self, pages: &[Params]) -> Result<(Document, DocumentMetrics)> {
        let empty = [Params::new()];
        let pages = if pages.is_empty() { &empty[..] } else { pages };

        let mut canvas = Canvas::new(self.page_size);
        let mut metrics = DocumentMetrics::default();
        let doc_start = Instant::now();
        for (index, params) in pages.iter().enumerate() {
            let page = self.render_page(index + 1, params, &mut canvas)?;
            metrics.pages.push(page);
        }
        metrics.total_render_ms = doc_start.elapsed().as_secs_f64() * 1000.0;
        Ok((canvas.finish(), metrics))
    }

    fn render_page(&self, page_number: usize, params: &Params, canvas: &mut Canvas) -> Result<PageMetrics> {
        let page_start = Instant::now();
        let content = self.margins.content_rect(self.page_size);

        let mut globals = self.globals.clone();
        globals.insert("pageNum", page_number);
        let mut ctx = RenderContext::new(
            Arc::clone(&self.services),
            globals,
            self.page_size,
            content.width,
        );

        let mut target = FlowTarget::new();
        for block in self.blocks.iter() {
            block.render(params, &mut target, &mut ctx)?;
        }
        let fragments = target.into_fragments();
        let mut frame = Frame::new(content);
        for fragment in &fragments {
            frame.add(fragment, canvas)?;
        }

        let output = ctx.into_output();
        let deferred_count = output.registry.len();
        canvas.add_assets(output.assets);
        output.registry.replay(canvas, self.services.debug.as_ref())?;

        let command_count = canvas.current_command_count();
        let render_ms = page_start.elapsed().as_secs_f64() * 1000.0;
        if let Some(logger) = self.services.debug.as_ref() {
            logger.log_event(
                "flow.page",
                &[
                    ("page", page_number.to_string()),
                    ("fragments", fragments.len().to_string()),
                    ("deferred", deferred_count.to_string()),
                    ("commands", command_count.to_string()),
                ],
            );
            logger.increment("flow.page", 1);
        }
        canvas.show_page();
        Ok(PageMetrics {
            page_number,
            render_ms,
            command_count,
            fragment_count: fragments.len(),
            deferred_count,
        })
    }
}
