//! Shared collaborators of every load in a book

use crate::config::ViewerConfig;
use crate::decoder::DecoderRegistry;
use crate::error::{LoadError, LoadResult};
use crate::picture::DisplayPolicy;
use folio_cache::MemoryPool;
use folio_pdf::{default_rasterizer, PdfRasterizer};
use folio_scheduler::CancellationToken;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Everything a content loader needs besides its entry
///
/// Built once per session and shared by reference-counted handle. The memory
/// pool and decoder registry are injected here instead of living in globals,
/// so tests and separate sessions never share state by accident.
pub struct LoadContext {
    config: ViewerConfig,
    pool: Arc<MemoryPool>,
    decoders: Arc<DecoderRegistry>,
    rasterizer: Arc<dyn PdfRasterizer>,
    display_policy: RwLock<DisplayPolicy>,
}

impl LoadContext {
    pub fn new(config: ViewerConfig) -> Self {
        let display_policy = config.display_policy();
        Self {
            config,
            pool: Arc::new(MemoryPool::new()),
            decoders: Arc::new(DecoderRegistry::new()),
            rasterizer: Arc::new(default_rasterizer()),
            display_policy: RwLock::new(display_policy),
        }
    }

    /// Share a memory pool with other contexts
    pub fn with_pool(mut self, pool: Arc<MemoryPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.decoders = Arc::new(decoders);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PdfRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    pub fn decoders(&self) -> &DecoderRegistry {
        &self.decoders
    }

    pub fn rasterizer(&self) -> &Arc<dyn PdfRasterizer> {
        &self.rasterizer
    }

    /// Current display policy
    pub fn display_policy(&self) -> DisplayPolicy {
        *self.display_policy.read()
    }

    /// Swap the display policy
    ///
    /// Already loaded pages keep their sizes until
    /// [`Page::refresh_picture_info`](crate::Page::refresh_picture_info) is
    /// called on them.
    pub fn set_display_policy(&self, policy: DisplayPolicy) {
        let mut current = self.display_policy.write();
        if *current != policy {
            debug!(
                width = policy.max_size.width,
                height = policy.max_size.height,
                limit_source_size = policy.limit_source_size,
                "Display policy changed"
            );
            *current = policy;
        }
    }
}

impl Default for LoadContext {
    fn default() -> Self {
        Self::new(ViewerConfig::default())
    }
}

/// Run CPU-bound work on the blocking pool, abandoning it on cancellation
///
/// The closure keeps running to completion after a cancel; only its result
/// is dropped.
pub(crate) async fn run_blocking<T, F>(token: &CancellationToken, work: F) -> LoadResult<T>
where
    F: FnOnce() -> LoadResult<T> + Send + 'static,
    T: Send + 'static,
{
    token.check()?;
    let task = tokio::task::spawn_blocking(work);

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(LoadError::Cancelled),
        joined = task => joined
            .map_err(|err| LoadError::Decode(format!("blocking task failed: {err}")))?,
    }
}
