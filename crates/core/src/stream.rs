//! Entry byte streams with an optional in-memory cache.
//!
//! Decoding a page and building its thumbnail both need the entry's bytes.
//! For entries inside a compressed archive, each open means another
//! extraction, so a [`StreamSource`] can materialize the bytes once and
//! serve later opens from memory. Filesystem entries are never cached: the
//! OS page cache already does that job.

use crate::archive::{capacity_hint, ArchiveEntry, EntryStream};
use crate::error::{LoadError, LoadResult};
use folio_scheduler::CancellationToken;
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

/// Read-only view into a shared byte buffer
#[derive(Debug, Clone)]
pub struct ByteView {
    buf: Arc<Vec<u8>>,
    offset: usize,
    count: usize,
}

impl ByteView {
    pub fn new(buf: Vec<u8>) -> Self {
        let count = buf.len();
        Self {
            buf: Arc::new(buf),
            offset: 0,
            count,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        &self.buf[self.offset..self.offset + self.count]
    }
}

/// Opens an entry's byte stream, optionally through a materialized cache
pub struct StreamSource {
    entry: Arc<ArchiveEntry>,
    decrypt: bool,
    caching_enabled: bool,
    cache: Mutex<Option<ByteView>>,
    /// Serializes cache materialization so the entry is extracted once
    fill_lock: tokio::sync::Mutex<()>,
    materialized: AtomicBool,
    opens: AtomicUsize,
}

impl StreamSource {
    pub fn new(entry: Arc<ArchiveEntry>, decrypt: bool) -> Self {
        Self {
            entry,
            decrypt,
            caching_enabled: true,
            cache: Mutex::new(None),
            fill_lock: tokio::sync::Mutex::new(()),
            materialized: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
        }
    }

    /// Enable or disable byte caching for non-filesystem entries
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    pub fn entry(&self) -> &Arc<ArchiveEntry> {
        &self.entry
    }

    fn cacheable(&self) -> bool {
        self.caching_enabled && !self.entry.is_filesystem()
    }

    async fn open_entry(&self, token: &CancellationToken) -> LoadResult<EntryStream> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        self.entry.open(self.decrypt, token).await
    }

    async fn read_entry(&self, token: &CancellationToken) -> LoadResult<Vec<u8>> {
        let mut stream = self.open_entry(token).await?;
        let mut bytes = Vec::with_capacity(capacity_hint(self.entry.length()));

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(LoadError::Cancelled),
            read = stream.read_to_end(&mut bytes) => {
                read?;
                Ok(bytes)
            }
        }
    }

    /// Materialize the byte cache
    ///
    /// Idempotent. The cache is created at most once per instance: after
    /// [`clear_cache`](Self::clear_cache) later opens go back to the entry.
    /// Does nothing for filesystem entries or when caching is disabled.
    pub async fn ensure_cached(&self, token: &CancellationToken) -> LoadResult<()> {
        if !self.cacheable() || self.materialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let _fill = self.fill_lock.lock().await;
        if self.materialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let bytes = self.read_entry(token).await?;
        token.check()?;

        debug!(entry = self.entry.path(), bytes = bytes.len(), "Materialized stream cache");
        *self.cache.lock() = Some(ByteView::new(bytes));
        self.materialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Open a byte stream, from the cache when it exists
    ///
    /// A stream over the cache holds its own reference to the buffer, so it
    /// stays valid across a concurrent [`clear_cache`](Self::clear_cache).
    pub async fn open_stream(&self, token: &CancellationToken) -> LoadResult<EntryStream> {
        token.check()?;
        if let Some(view) = self.cached() {
            trace!(entry = self.entry.path(), "Opening cached stream");
            return Ok(Box::pin(Cursor::new(view)));
        }
        self.open_entry(token).await
    }

    /// All bytes of the entry, from the cache when it exists
    pub async fn read_all(&self, token: &CancellationToken) -> LoadResult<ByteView> {
        token.check()?;
        if let Some(view) = self.cached() {
            return Ok(view);
        }
        Ok(ByteView::new(self.read_entry(token).await?))
    }

    fn cached(&self) -> Option<ByteView> {
        self.cache.lock().clone()
    }

    /// Release the byte cache
    pub fn clear_cache(&self) {
        if let Some(view) = self.cache.lock().take() {
            debug!(entry = self.entry.path(), bytes = view.len(), "Cleared stream cache");
        }
    }

    /// Bytes held by the cache
    pub fn cache_size(&self) -> usize {
        self.cache.lock().as_ref().map_or(0, ByteView::len)
    }

    /// Number of times the underlying entry has been opened
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }
}

/// Weak handle to the stream source a page's loaders currently share
///
/// Content and thumbnail loads running close together pick up the same
/// source, and therefore the same cache. Once every holder drops it the next
/// load starts fresh.
#[derive(Default)]
pub(crate) struct StreamSlot(Mutex<Weak<StreamSource>>);

impl StreamSlot {
    pub(crate) fn get_or_create(
        &self,
        create: impl FnOnce() -> StreamSource,
    ) -> Arc<StreamSource> {
        let mut slot = self.0.lock();
        if let Some(source) = slot.upgrade() {
            return source;
        }
        let source = Arc::new(create());
        *slot = Arc::downgrade(&source);
        source
    }
}
