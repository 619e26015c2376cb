mod assets;
mod block;
mod canvas;
mod columns;
mod context;
mod debug;
mod deferred;
mod doc_template;
mod error;
mod expr;
mod fragment;
mod frame;
mod image;
mod metrics;
mod svg;
mod table;
mod types;

pub use assets::{Asset, AssetBundle, FsLoader, Locator, LocatorScheme, ResourceLoader};
pub use block::{Block, BlockCommon, Condition, MapBlock, TextBlock};
pub use canvas::{Canvas, Command, Document, DrawingSurface, NamedRegion, Page, StateGuard};
pub use columns::{AbsoluteColumnsBlock, AbsoluteColumnsBuilder};
pub use context::{DrawEnv, RenderContext, RenderOutput, Services};
pub use debug::DebugLogger;
pub use deferred::{Anchor, DrawRegistry, Drawer, PlaceholderId};
pub use doc_template::DocTemplate;
pub use error::{BlockPrintError, ErrorKind, Result};
pub use expr::{Expr, ParamValue, Params, Scope, evaluate};
pub use fragment::{FlowTarget, Fragment, ImageFragment, Placeholder, TextFragment, create_placeholder};
pub use frame::Frame;
pub use crate::image::{ConfigurableImageBlock, ConfigurableImageBuilder, create_image_fragment};
pub use metrics::{DocumentMetrics, PageMetrics};
pub use svg::{PageFormat, SvgProgram, SvgTranscoder, TranscodeOptions, Transcoder, VectorProgram};
pub use table::{DefaultTableBuilder, Table, TableBuilder, TableConfig};
pub use types::{Color, HorizontalAlign, Margins, Pt, Rect, Size};

use std::path::PathBuf;
use std::sync::Arc;

const ENV_DEBUG_LOG: &str = "BLOCKPRINT_DEBUG_LOG";
const ENV_BASE_DIR: &str = "BLOCKPRINT_BASE_DIR";

pub struct BlockPrint {
    template: DocTemplate,
    blocks: Arc<Vec<Block>>,
}

#[derive(Clone)]
pub struct BlockPrintBuilder {
    page_size: Size,
    margins: Margins,
    base_dir: Option<PathBuf>,
    debug_path: Option<PathBuf>,
    transcode: TranscodeOptions,
    loader: Option<Arc<dyn ResourceLoader>>,
    transcoder: Option<Arc<dyn Transcoder>>,
    table_builder: Option<Arc<dyn TableBuilder>>,
}

impl Default for BlockPrintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockPrintBuilder {
    pub fn new() -> Self {
        Self {
            page_size: Size::a4(),
            margins: Margins::all(36.0),
            base_dir: None,
            debug_path: None,
            transcode: TranscodeOptions::default(),
            loader: None,
            transcoder: None,
            table_builder: None,
        }
    }

    pub fn from_env() -> Self {
        Self::new().with_env(|key| std::env::var(key).ok())
    }

    fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(path) = non_empty(ENV_DEBUG_LOG) {
            self.debug_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = non_empty(ENV_BASE_DIR) {
            self.base_dir = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.page_size = size;
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.margins = margins;
        self
    }

    pub fn margin_all(mut self, value: f32) -> Self {
        self.margins = Margins::all(value);
        self
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn suppress_transcoder_warnings(mut self, suppress: bool) -> Self {
        self.transcode.suppress_warnings = suppress;
        self
    }

    pub fn resource_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    pub fn table_builder(mut self, builder: Arc<dyn TableBuilder>) -> Self {
        self.table_builder = Some(builder);
        self
    }

    pub fn build(self, blocks: Vec<Block>) -> Result<BlockPrint> {
        for block in &blocks {
            block.validate()?;
        }
        let defaults = Services::default();
        let debug = match self.debug_path {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(FsLoader::new(self.base_dir.clone())));
        let services = Services {
            table_builder: self.table_builder.unwrap_or(defaults.table_builder),
            loader,
            transcoder: self.transcoder.unwrap_or(defaults.transcoder),
            transcode: self.transcode,
            debug,
        };

        let mut globals = Params::new();
        if let Some(dir) = &self.base_dir {
            globals.insert("configDir", dir.display().to_string());
        }
        let blocks = Arc::new(blocks);
        Ok(BlockPrint {
            template: DocTemplate::new(
                self.page_size,
                self.margins,
                Arc::clone(&blocks),
                Arc::new(services),
                globals,
            ),
            blocks,
        })
    }
}

impl BlockPrint {
    pub fn builder() -> BlockPrintBuilder {
        BlockPrintBuilder::new()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn render(&self, pages: &[Params]) -> Result<Document> {
        self.template.build(pages)
    }

    pub fn render_with_metrics(&self, pages: &[Params]) -> Result<(Document, DocumentMetrics)> {
        self.template.build_with_metrics(pages)
    }

    // Results keep input order; the debug log gets one summary for the whole batch.
    pub fn render_batch(&self, documents: &[Vec<Params>]) -> Result<Vec<Document>> {
        use rayon::prelude::*;

        let result = documents
            .par_iter()
            .map(|pages| self.template.render_document(pages).map(|(doc, _)| doc))
            .collect();
        self.template.emit_summary("batch");
        result
    }

    pub fn locate_named_sub_block(&self, name: Option<&str>) -> Option<&MapBlock> {
        self.blocks
            .iter()
            .find_map(|block| block.locate_named_sub_block(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn text(s: &str) -> Block {
        TextBlock::new(s).unwrap().into()
    }

    #[derive(Debug)]
    struct FailingProgram;

    impl VectorProgram for FailingProgram {
        fn natural_size(&self) -> Option<(f32, f32)> {
            Some((10.0, 10.0))
        }

        fn print(&self, surface: &mut DrawingSurface<'_>, _format: &PageFormat) -> Result<()> {
            surface.move_to(Pt::ZERO, Pt::ZERO);
            Err(BlockPrintError::Transcode("unsupported gradient".into()))
        }
    }

    struct FailingTranscoder;

    impl Transcoder for FailingTranscoder {
        fn transcode(
            &self,
            _locator: &Locator,
            _loader: &dyn ResourceLoader,
            _options: &TranscodeOptions,
        ) -> Result<Arc<dyn VectorProgram>> {
            Ok(Arc::new(FailingProgram))
        }
    }

    #[derive(Default)]
    struct CountingTableBuilder {
        calls: Mutex<usize>,
    }

    impl TableBuilder for CountingTableBuilder {
        fn build_table(
            &self,
            items: &[Block],
            params: &Params,
            ctx: &mut RenderContext,
            nb_columns: Option<usize>,
            config: Option<&TableConfig>,
        ) -> Result<Option<Table>> {
            if let Ok(mut calls) = self.calls.lock() {
                *calls += 1;
            }
            DefaultTableBuilder.build_table(items, params, ctx, nb_columns, config)
        }
    }

    fn strings(page: &Page) -> Vec<String> {
        page.commands
            .iter()
            .filter_map(|c| match c {
                Command::DrawString { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn build_rejects_invalid_trees_up_front() {
        let err = BlockPrint::builder()
            .build(vec![MapBlock::new(None, "", "10").unwrap().into()])
            .err()
            .unwrap();
        assert!(matches!(err, BlockPrintError::InvalidValue { ref field, .. } if field == "width"));
    }

    #[test]
    fn end_to_end_mixed_document() {
        let columns = AbsoluteColumnsBlock::builder()
            .item(text("left"))
            .item(MapBlock::new(Some("inset"), "40", "30").unwrap())
            .widths(vec![30, 70])
            .build()
            .unwrap();
        let footer = AbsoluteColumnsBlock::builder()
            .item(text("© ${owner}"))
            .absolute_x("${margin}")
            .absolute_y("40")
            .width("200")
            .build()
            .unwrap();
        let engine = BlockPrint::builder()
            .page_size(Size::new(400.0, 300.0))
            .margin_all(20.0)
            .build(vec![
                text("Report ${pageNum}"),
                columns.into(),
                MapBlock::new(Some("main"), "200", "100").unwrap().into(),
                footer.into(),
            ])
            .unwrap();

        let params = Params::new().with("owner", "OSM").with("margin", 20);
        let (doc, metrics) = engine.render_with_metrics(&[params]).unwrap();
        let page = &doc.pages[0];
        assert_eq!(strings(page), vec!["Report 1", "left", "© OSM"]);
        let names: Vec<_> = page.regions.iter().map(|r| r.name.as_deref()).collect();
        assert_eq!(names, vec![Some("inset"), Some("main")]);
        assert_eq!(metrics.pages[0].deferred_count, 3);
        assert_eq!(metrics.deferred_count(), 3);
        assert_eq!(page.regions[1].rect.width, Pt::from_f32(200.0));

        let inset = engine.locate_named_sub_block(Some("inset")).unwrap();
        assert_eq!(inset.name(), Some("inset"));
        assert!(engine.locate_named_sub_block(Some("missing")).is_none());
    }

    #[test]
    fn missing_parameter_aborts_the_document() {
        let engine = BlockPrint::builder()
            .build(vec![text("${title}")])
            .unwrap();
        let err = engine.render(&[Params::new()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Evaluation);
    }

    #[test]
    fn transcoding_failure_propagates() {
        let image = ConfigurableImageBlock::builder()
            .url("legend.svg")
            .max_width("50")
            .max_height("50")
            .rotation("30")
            .build()
            .unwrap();
        let engine = BlockPrint::builder()
            .transcoder(Arc::new(FailingTranscoder))
            .build(vec![image.into()])
            .unwrap();
        let err = engine.render(&[Params::new()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transcoding);
    }

    #[test]
    fn batch_matches_sequential_rendering() {
        let engine = BlockPrint::builder()
            .build(vec![
                text("${city} page ${pageNum}"),
                MapBlock::new(None, "${size}", "${size}").unwrap().into(),
            ])
            .unwrap();
        let jobs: Vec<Vec<Params>> = (0..8)
            .map(|i| {
                vec![
                    Params::new().with("city", format!("c{i}")).with("size", 10 + i),
                    Params::new().with("city", "again").with("size", 5),
                ]
            })
            .collect();
        let batch = engine.render_batch(&jobs).unwrap();
        assert_eq!(batch.len(), jobs.len());
        for (job, doc) in jobs.iter().zip(&batch) {
            let single = engine.render(job).unwrap();
            assert_eq!(doc.pages.len(), 2);
            for (a, b) in doc.pages.iter().zip(&single.pages) {
                assert_eq!(a.commands, b.commands);
                assert_eq!(a.regions, b.regions);
            }
        }
    }

    #[test]
    fn batch_writes_a_single_summary_covering_every_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.jsonl");
        let engine = BlockPrint::builder()
            .debug_log(&path)
            .build(vec![MapBlock::new(None, "10", "10").unwrap().into()])
            .unwrap();
        let jobs: Vec<Vec<Params>> = (0..6).map(|_| vec![Params::new()]).collect();
        engine.render_batch(&jobs).unwrap();

        let log = std::fs::read_to_string(&path).unwrap();
        let summaries: Vec<&str> = log
            .lines()
            .filter(|line| line.contains("\"type\":\"debug.summary\""))
            .collect();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].contains("\"context\":\"batch\""));
        assert!(summaries[0].contains("\"flow.page\":6"));
        assert!(summaries[0].contains("\"deferred.register\":6"));
        assert!(summaries[0].contains("\"deferred.paint\":6"));
    }

    #[test]
    fn absolute_tables_build_through_the_configured_builder_at_paint_time() {
        let counting = Arc::new(CountingTableBuilder::default());
        let table = AbsoluteColumnsBlock::builder()
            .item(text("x"))
            .absolute_x("0")
            .absolute_y("100")
            .width("100")
            .build()
            .unwrap();
        let engine = BlockPrint::builder()
            .table_builder(counting.clone())
            .build(vec![table.into()])
            .unwrap();
        engine
            .render(&[Params::new(), Params::new(), Params::new()])
            .unwrap();
        assert_eq!(*counting.calls.lock().unwrap(), 3);
    }

    #[test]
    fn base_dir_feeds_loader_and_globals() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("arrow.svg"),
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10"><path d="M0 0 L10 5 L0 10 Z"/></svg>"#,
        )
        .unwrap();
        let image = ConfigurableImageBlock::builder()
            .url("arrow.svg")
            .max_width("20")
            .max_height("20")
            .build()
            .unwrap();
        let engine = BlockPrint::builder()
            .base_dir(dir.path())
            .build(vec![image.into(), text("${configDir}")])
            .unwrap();
        let doc = engine.render(&[]).unwrap();
        let page = &doc.pages[0];
        assert!(page.commands.contains(&Command::Fill));
        assert_eq!(strings(page), vec![dir.path().display().to_string()]);
    }

    #[test]
    fn environment_overrides() {
        let builder = BlockPrintBuilder::new().with_env(|key| match key {
            ENV_BASE_DIR => Some("/srv/print".to_string()),
            ENV_DEBUG_LOG => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(builder.base_dir, Some(PathBuf::from("/srv/print")));
        assert!(builder.debug_path.is_none());
    }
}
