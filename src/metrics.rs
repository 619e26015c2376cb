#[derive(Debug, Clone, Default)]
pub struct PageMetrics {
    pub page_number: usize,
    pub render_ms: f64,
    pub command_count: usize,
    pub fragment_count: usize,
    pub deferred_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentMetrics {
    pub pages: Vec<PageMetrics>,
    pub total_render_ms: f64,
}

impl DocumentMetrics {
    pub fn deferred_count(&self) -> usize {
        self.pages.iter().map(|page| page.deferred_count).sum()
    }
}
