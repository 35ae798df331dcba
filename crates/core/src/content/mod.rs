//! Page content: the per-page load state machine.
//!
//! A [`PageContent`] owns one loader chosen from the entry's [`PageKind`]
//! when the page is built, and moves through
//!
//! ```text
//! Unloaded ──load──▶ Loading ──ok──▶ Loaded
//!     ▲                 │  └──err──▶ Failed
//!     └──── cancel ─────┘
//!     ▲                               │
//!     └──────── unload / eviction ────┘
//! ```
//!
//! Concurrent load requests share one in-flight future, so a page is never
//! decoded twice at once. Cancellation puts the content back to `Unloaded`
//! without an event and without registering anything with the memory pool.

mod animated;
mod archive;
mod bitmap;
mod file;
mod pdf;
mod source;

pub use self::animated::AnimationClass;
pub use self::source::{ArchiveClass, Frame, PagePayload, PageSource, PlaceholderIcon};

pub(crate) use self::archive::classify as classify_search;

use self::animated::AnimatedLoader;
use self::bitmap::BitmapLoader;
use crate::archive::{ArchiveEntry, EntryKind};
use crate::context::LoadContext;
use crate::error::LoadResult;
use crate::page::PageEvent;
use crate::picture::Size;
use crate::stream::{StreamSlot, StreamSource};
use folio_cache::{MemoryElement, MemoryOwner};
use folio_scheduler::{Cancelled, CancellationToken};
use futures::future::{BoxFuture, Shared, WeakShared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Content variant of a page, decided from its entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Bitmap,
    Animated,
    Pdf,
    Archive,
    File,
}

impl PageKind {
    pub fn classify(entry: &ArchiveEntry) -> Self {
        match entry.kind() {
            EntryKind::PdfPage { .. } => PageKind::Pdf,
            EntryKind::Directory | EntryKind::Archive => PageKind::Archive,
            EntryKind::File if entry.may_be_animated() => PageKind::Animated,
            EntryKind::File if entry.is_image() => PageKind::Bitmap,
            EntryKind::File => PageKind::File,
        }
    }

    /// Placeholder kinds that never hold pixel data
    pub fn is_file_content(self) -> bool {
        matches!(self, PageKind::Archive | PageKind::File)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// Borrowed inputs of one load attempt
pub(crate) struct LoadInput<'a> {
    pub entry: &'a Arc<ArchiveEntry>,
    pub ctx: &'a LoadContext,
    pub stream: &'a Arc<StreamSource>,
    pub token: &'a CancellationToken,
}

enum ContentLoader {
    Bitmap(BitmapLoader),
    Animated(AnimatedLoader),
    Pdf,
    Archive,
    File,
}

impl ContentLoader {
    fn new(kind: PageKind) -> Self {
        match kind {
            PageKind::Bitmap => ContentLoader::Bitmap(BitmapLoader::default()),
            PageKind::Animated => ContentLoader::Animated(AnimatedLoader::default()),
            PageKind::Pdf => ContentLoader::Pdf,
            PageKind::Archive => ContentLoader::Archive,
            PageKind::File => ContentLoader::File,
        }
    }

    async fn load(&self, input: &LoadInput<'_>) -> LoadResult<PageSource> {
        match self {
            ContentLoader::Bitmap(loader) => loader.load(input).await,
            ContentLoader::Animated(loader) => loader.load(input).await,
            ContentLoader::Pdf => pdf::load(input).await,
            ContentLoader::Archive => archive::load(input).await,
            ContentLoader::File => Ok(file::load(input.entry)),
        }
    }
}

type LoadFuture = BoxFuture<'static, Result<ContentState, Cancelled>>;

struct ContentInner {
    state: ContentState,
    source: Arc<PageSource>,
    /// Bumped on every load start and unload; stale loads and stale pool
    /// elements compare against it
    generation: u64,
    in_flight: Option<WeakShared<LoadFuture>>,
    memory: Option<Arc<dyn MemoryElement>>,
}

/// Load state and current payload of one page
pub struct PageContent {
    entry: Arc<ArchiveEntry>,
    kind: PageKind,
    loader: ContentLoader,
    ctx: Arc<LoadContext>,
    owner: Weak<dyn MemoryOwner>,
    events: broadcast::Sender<PageEvent>,
    streams: StreamSlot,
    inner: Mutex<ContentInner>,
}

impl PageContent {
    pub(crate) fn new(
        entry: Arc<ArchiveEntry>,
        ctx: Arc<LoadContext>,
        owner: Weak<dyn MemoryOwner>,
        events: broadcast::Sender<PageEvent>,
    ) -> Self {
        let kind = PageKind::classify(&entry);
        Self {
            entry,
            kind,
            loader: ContentLoader::new(kind),
            ctx,
            owner,
            events,
            streams: StreamSlot::default(),
            inner: Mutex::new(ContentInner {
                state: ContentState::Unloaded,
                source: Arc::default(),
                generation: 0,
                in_flight: None,
                memory: None,
            }),
        }
    }

    pub fn entry(&self) -> &Arc<ArchiveEntry> {
        &self.entry
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    pub fn is_file_content(&self) -> bool {
        self.kind.is_file_content()
    }

    pub fn state(&self) -> ContentState {
        self.inner.lock().state
    }

    /// Result of the last completed load
    pub fn source(&self) -> Arc<PageSource> {
        Arc::clone(&self.inner.lock().source)
    }

    pub fn payload(&self) -> Option<PagePayload> {
        self.inner.lock().source.data.clone()
    }

    pub fn size(&self) -> Size {
        self.inner.lock().source.size()
    }

    pub fn data_size(&self) -> usize {
        self.inner.lock().source.data_size
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().source.error_message.clone()
    }

    /// Animated-or-static classification, once sniffed
    pub fn animation_class(&self) -> Option<AnimationClass> {
        match &self.loader {
            ContentLoader::Animated(loader) => loader.class(),
            _ => None,
        }
    }

    /// Number of signature scans performed for this content
    pub fn sniff_count(&self) -> usize {
        match &self.loader {
            ContentLoader::Animated(loader) => loader.sniff_count(),
            _ => 0,
        }
    }

    pub(crate) fn context(&self) -> &Arc<LoadContext> {
        &self.ctx
    }

    /// Stream source shared with a concurrent thumbnail load, if any
    pub(crate) fn stream_source(&self) -> Arc<StreamSource> {
        self.streams.get_or_create(|| {
            StreamSource::new(Arc::clone(&self.entry), true)
                .with_caching(self.ctx.config().cache_archive_streams)
        })
    }

    /// Load the content, or join the load already in flight
    ///
    /// Returns immediately for content that is `Loaded` or `Failed`. The
    /// token of the caller that starts a load governs it; callers that join
    /// observe its outcome.
    pub async fn load(self: &Arc<Self>, token: &CancellationToken) -> Result<ContentState, Cancelled> {
        token.check()?;
        let load = {
            let mut inner = self.inner.lock();
            let joined = match inner.state {
                ContentState::Loaded | ContentState::Failed => return Ok(inner.state),
                ContentState::Loading => inner.in_flight.as_ref().and_then(WeakShared::upgrade),
                ContentState::Unloaded => None,
            };
            match joined {
                Some(load) => {
                    trace!(entry = self.entry.path(), "Joining in-flight load");
                    load
                }
                None => self.start_load(&mut inner, token),
            }
        };
        load.await
    }

    fn start_load(
        self: &Arc<Self>,
        inner: &mut ContentInner,
        token: &CancellationToken,
    ) -> Shared<LoadFuture> {
        inner.generation += 1;
        inner.state = ContentState::Loading;
        let load = Arc::clone(self)
            .run_load(inner.generation, token.clone())
            .boxed()
            .shared();
        inner.in_flight = load.downgrade();
        trace!(entry = self.entry.path(), generation = inner.generation, "Load started");
        load
    }

    async fn run_load(
        self: Arc<Self>,
        generation: u64,
        token: CancellationToken,
    ) -> Result<ContentState, Cancelled> {
        let guard = LoadingGuard {
            content: &self,
            generation,
            armed: true,
        };

        let stream = self.stream_source();
        let input = LoadInput {
            entry: &self.entry,
            ctx: &self.ctx,
            stream: &stream,
            token: &token,
        };
        let result = self.loader.load(&input).await;

        if token.is_cancelled() || result.as_ref().is_err_and(|err| err.is_cancelled()) {
            debug!(entry = self.entry.path(), "Load cancelled");
            return Err(Cancelled);
        }

        let source = result.unwrap_or_else(|err| {
            warn!(
                entry = self.entry.path(),
                kind = ?err.kind(),
                error = %err,
                "Page load failed"
            );
            PageSource::failed(err.user_message())
        });

        guard.disarm();
        Ok(self.finish(generation, source))
    }

    /// Commit a load result and register its memory
    fn finish(self: &Arc<Self>, generation: u64, source: PageSource) -> ContentState {
        let (state, old_size, new_size) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation || inner.state != ContentState::Loading {
                return inner.state;
            }

            let state = if source.is_failed() {
                ContentState::Failed
            } else {
                ContentState::Loaded
            };
            let old_size = inner.source.size();
            let new_size = source.size();
            let data_size = source.data_size;

            inner.state = state;
            inner.source = Arc::new(source);
            inner.in_flight = None;

            // Registered under the content lock so an explicit unload can
            // never run between commit and registration
            if data_size > 0 {
                if let Some(owner) = self.owner.upgrade() {
                    let memory: Arc<dyn MemoryElement> = Arc::new(ContentMemory {
                        content: Arc::downgrade(self),
                        generation,
                        size: data_size,
                    });
                    if self.ctx.pool().add(&owner, Arc::clone(&memory)) {
                        inner.memory = Some(memory);
                    }
                }
            }

            (state, old_size, new_size)
        };

        debug!(entry = self.entry.path(), ?state, size = ?new_size, "Load finished");
        self.emit(PageEvent::ContentChanged(state));
        if old_size != new_size {
            self.emit(PageEvent::SizeChanged(new_size));
        }
        state
    }

    /// Back to `Unloaded` after a cancelled or abandoned load
    fn abandon(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == ContentState::Loading {
            inner.state = ContentState::Unloaded;
            inner.in_flight = None;
        }
    }

    /// Release the payload and its stream cache
    ///
    /// Only `Loaded` and `Failed` content can be unloaded; an in-flight load
    /// is stopped through its token instead. Returns true if anything was
    /// released.
    pub fn unload(&self) -> bool {
        let old = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, ContentState::Loaded | ContentState::Failed) {
                return false;
            }
            if let Some(memory) = inner.memory.take() {
                self.ctx.pool().remove(&memory);
            }
            Self::reset(&mut inner)
        };
        self.after_unload(old);
        true
    }

    /// Eviction path: the pool has already dropped the element
    fn release(&self, generation: u64) {
        let old = {
            let mut inner = self.inner.lock();
            if inner.generation != generation
                || !matches!(inner.state, ContentState::Loaded | ContentState::Failed)
            {
                return;
            }
            inner.memory = None;
            Self::reset(&mut inner)
        };
        self.after_unload(old);
    }

    fn reset(inner: &mut ContentInner) -> Arc<PageSource> {
        inner.generation += 1;
        inner.state = ContentState::Unloaded;
        std::mem::take(&mut inner.source)
    }

    fn after_unload(&self, old: Arc<PageSource>) {
        old.release_stream();
        debug!(entry = self.entry.path(), released = old.data_size, "Content unloaded");
        self.emit(PageEvent::ContentChanged(ContentState::Unloaded));
        if old.size() != Size::default() {
            self.emit(PageEvent::SizeChanged(Size::default()));
        }
    }

    /// Re-clamp the display size under the context's current policy
    ///
    /// Returns true and emits `SizeChanged` if the size changed.
    pub fn refresh_picture_info(&self) -> bool {
        let policy = self.ctx.display_policy();
        let size = {
            let mut inner = self.inner.lock();
            let Some(info) = inner.source.picture_info.as_ref() else {
                return false;
            };
            let refreshed = info.refreshed(&policy);
            if refreshed.size == info.size {
                return false;
            }
            let size = refreshed.size;
            let mut source = PageSource::clone(&inner.source);
            source.picture_info = Some(refreshed);
            inner.source = Arc::new(source);
            size
        };
        self.emit(PageEvent::SizeChanged(size));
        true
    }

    fn emit(&self, event: PageEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for PageContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageContent")
            .field("entry", &self.entry.path())
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

/// Resets a `Loading` state when the load future ends without committing
struct LoadingGuard<'a> {
    content: &'a PageContent,
    generation: u64,
    armed: bool,
}

impl LoadingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.content.abandon(self.generation);
        }
    }
}

/// Pool element standing for one committed load
struct ContentMemory {
    content: Weak<PageContent>,
    generation: u64,
    size: usize,
}

impl MemoryElement for ContentMemory {
    fn memory_size(&self) -> usize {
        self.size
    }

    fn unload(&self) {
        if let Some(content) = self.content.upgrade() {
            content.release(self.generation);
        }
    }
}
