use crate::assets::{Asset, AssetBundle, FsLoader, ResourceLoader};
use crate::debug::{DebugLogger, json_str};
use crate::deferred::{DrawRegistry, Drawer, PlaceholderId};
use crate::expr::{Params, Scope};
use crate::svg::{SvgTranscoder, TranscodeOptions, Transcoder};
use crate::table::{DefaultTableBuilder, TableBuilder};
use crate::types::{Pt, Size};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct Services {
    pub table_builder: Arc<dyn TableBuilder>,
    pub loader: Arc<dyn ResourceLoader>,
    pub transcoder: Arc<dyn Transcoder>,
    pub transcode: TranscodeOptions,
    pub debug: Option<DebugLogger>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            table_builder: Arc::new(DefaultTableBuilder),
            loader: Arc::new(FsLoader::default()),
            transcoder: Arc::new(SvgTranscoder),
            transcode: TranscodeOptions::default(),
            debug: None,
        }
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("transcode", &self.transcode)
            .field("debug", &self.debug.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct RenderContext {
    services: Arc<Services>,
    globals: Params,
    page_size: Size,
    content_width: Pt,
    registry: DrawRegistry,
    ids: Arc<AtomicU32>,
    assets: AssetBundle,
}

#[derive(Debug)]
pub struct RenderOutput {
    pub registry: DrawRegistry,
    pub assets: AssetBundle,
}

impl RenderContext {
    pub fn new(services: Arc<Services>, globals: Params, page_size: Size, content_width: Pt) -> Self {
        Self {
            services,
            globals,
            page_size,
            content_width,
            registry: DrawRegistry::new(),
            ids: Arc::new(AtomicU32::new(1)),
            assets: AssetBundle::default(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn globals(&self) -> &Params {
        &self.globals
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn content_width(&self) -> Pt {
        self.content_width
    }

    pub fn scope<'a>(&'a self, params: &'a Params) -> Scope<'a> {
        Scope::with_globals(params, &self.globals)
    }

    pub fn next_placeholder_id(&self) -> PlaceholderId {
        PlaceholderId(self.ids.fetch_add(1, Ordering::Relaxed))
    }

    pub fn registry(&self) -> &DrawRegistry {
        &self.registry
    }

    pub fn register_absolute(&mut self, drawer: Box<dyn Drawer>) -> usize {
        self.log_register(drawer.as_ref(), None);
        self.registry.add_absolute_drawer(drawer)
    }

    pub fn register_placeholder(&mut self, id: PlaceholderId, drawer: Box<dyn Drawer>) -> usize {
        self.log_register(drawer.as_ref(), Some(id));
        self.registry.add_placeholder_drawer(id, drawer)
    }

    fn log_register(&self, drawer: &dyn Drawer, id: Option<PlaceholderId>) {
        let Some(logger) = self.services.debug.as_ref() else {
            return;
        };
        let placeholder = id
            .map(|id| id.0.to_string())
            .unwrap_or_else(|| "null".to_string());
        logger.log_event(
            "deferred.register",
            &[
                ("index", self.registry.len().to_string()),
                ("kind", json_str(drawer.kind())),
                ("placeholder", placeholder),
            ],
        );
        logger.increment("deferred.register", 1);
    }

    pub fn add_asset(&mut self, asset: Asset) {
        self.assets.add(asset);
    }

    pub fn assets(&self) -> &AssetBundle {
        &self.assets
    }

    pub fn env(&self) -> DrawEnv {
        DrawEnv {
            services: Arc::clone(&self.services),
            globals: self.globals.clone(),
            page_size: self.page_size,
            content_width: self.content_width,
            ids: Arc::clone(&self.ids),
        }
    }

    pub fn nested(&self) -> RenderContext {
        self.env().context()
    }

    pub fn into_output(self) -> RenderOutput {
        RenderOutput {
            registry: self.registry,
            assets: self.assets,
        }
    }
}

#[derive(Clone)]
pub struct DrawEnv {
    services: Arc<Services>,
    globals: Params,
    page_size: Size,
    content_width: Pt,
    ids: Arc<AtomicU32>,
}

impl DrawEnv {
    pub fn context(&self) -> RenderContext {
        RenderContext {
            services: Arc::clone(&self.services),
            globals: self.globals.clone(),
            page_size: self.page_size,
            content_width: self.content_width,
            registry: DrawRegistry::new(),
            ids: Arc::clone(&self.ids),
            assets: AssetBundle::default(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn globals(&self) -> &Params {
        &self.globals
    }
}

impl fmt::Debug for DrawEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawEnv")
            .field("globals", &self.globals)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
