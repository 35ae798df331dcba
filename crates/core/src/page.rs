//! Pages: one entry of a book with its content and thumbnail.
//!
//! A [`Page`] is the memory owner its content is charged to. It is locked
//! against eviction while visible or while a bulk operation holds it.

use crate::archive::ArchiveEntry;
use crate::content::{ContentState, PageContent, PageKind, PagePayload};
use crate::context::LoadContext;
use crate::picture::Size;
use crate::thumbnail::{Thumbnail, ThumbnailLoader};
use folio_cache::{MemoryOwner, OwnerId};
use folio_scheduler::{Cancelled, CancellationToken};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::trace;

/// Unique page identifier, shared with the memory pool's owner ids
pub type PageId = OwnerId;

const EVENT_CAPACITY: usize = 64;

/// Change notifications published by a page
///
/// Sent only after the change is visible through the page's accessors.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    ContentChanged(ContentState),
    SizeChanged(Size),
    ThumbnailChanged,
}

pub struct Page {
    id: PageId,
    index: AtomicUsize,
    visible: AtomicBool,
    marked: AtomicBool,
    deleted: AtomicBool,
    pending_ops: AtomicUsize,
    content: Arc<PageContent>,
    thumbnail: ThumbnailLoader,
    events: broadcast::Sender<PageEvent>,
}

impl Page {
    pub fn new(entry: Arc<ArchiveEntry>, index: usize, ctx: Arc<LoadContext>) -> Arc<Self> {
        let id = ctx.pool().allocate_owner_id();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new_cyclic(|page: &Weak<Page>| {
            let owner: Weak<dyn MemoryOwner> = page.clone();
            let content = PageContent::new(entry, ctx, owner, events.clone());
            trace!(id, index, kind = ?content.kind(), "Page created");
            Page {
                id,
                index: AtomicUsize::new(index),
                visible: AtomicBool::new(false),
                marked: AtomicBool::new(false),
                deleted: AtomicBool::new(false),
                pending_ops: AtomicUsize::new(0),
                content: Arc::new(content),
                thumbnail: ThumbnailLoader::new(),
                events,
            }
        })
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    /// Display position within the book
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    pub fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    /// Visible pages are never evicted
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }

    pub fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Relaxed)
    }

    pub fn set_marked(&self, marked: bool) {
        self.marked.store(marked, Ordering::Relaxed);
    }

    /// Deleted on the page itself or on its entry
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Relaxed) || self.content.entry().is_deleted()
    }

    pub fn set_deleted(&self, deleted: bool) {
        self.deleted.store(deleted, Ordering::Relaxed);
    }

    pub fn pending_operations(&self) -> usize {
        self.pending_ops.load(Ordering::Acquire)
    }

    /// Mark an operation in progress until the guard is dropped
    ///
    /// The page stays locked against eviction and is reported busy to
    /// other bulk operations meanwhile.
    pub fn begin_operation(&self) -> PendingOperation<'_> {
        self.pending_ops.fetch_add(1, Ordering::AcqRel);
        PendingOperation { page: self }
    }

    pub fn entry(&self) -> &Arc<ArchiveEntry> {
        self.content.entry()
    }

    pub fn kind(&self) -> PageKind {
        self.content.kind()
    }

    pub fn content(&self) -> &Arc<PageContent> {
        &self.content
    }

    pub fn content_state(&self) -> ContentState {
        self.content.state()
    }

    pub fn payload(&self) -> Option<PagePayload> {
        self.content.payload()
    }

    /// Display size of the loaded content, empty while unloaded
    pub fn size(&self) -> Size {
        self.content.size()
    }

    /// Thumbnail, if one has been computed
    pub fn thumbnail(&self) -> Option<Thumbnail> {
        self.thumbnail.get()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    /// Load the full content
    ///
    /// Cancellation is not an error here: the page is left as it was and
    /// its current state is returned.
    pub async fn load_content(&self, token: &CancellationToken) -> ContentState {
        match self.content.load(token).await {
            Ok(state) => state,
            Err(Cancelled) => self.content.state(),
        }
    }

    /// Load the thumbnail; `None` only when cancelled
    pub async fn load_thumbnail(&self, token: &CancellationToken) -> Option<Thumbnail> {
        match self.thumbnail.load(&self.content, token).await {
            Ok((thumbnail, created)) => {
                if created {
                    let _ = self.events.send(PageEvent::ThumbnailChanged);
                }
                Some(thumbnail)
            }
            Err(Cancelled) => None,
        }
    }

    pub fn unload(&self) -> bool {
        self.content.unload()
    }

    pub fn refresh_picture_info(&self) -> bool {
        self.content.refresh_picture_info()
    }
}

impl MemoryOwner for Page {
    fn owner_id(&self) -> OwnerId {
        self.id
    }

    fn is_locked(&self) -> bool {
        self.is_visible() || self.pending_operations() > 0
    }

    fn index(&self) -> i64 {
        Page::index(self) as i64
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("index", &self.index())
            .field("entry", &self.entry().path())
            .field("kind", &self.kind())
            .field("state", &self.content_state())
            .finish()
    }
}

/// Pending-operation marker returned by [`Page::begin_operation`]
pub struct PendingOperation<'a> {
    page: &'a Page,
}

impl Drop for PendingOperation<'_> {
    fn drop(&mut self) {
        self.page.pending_ops.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entries_of, png_bytes, MemorySource};
    use std::time::Duration;

    async fn book_pages(count: usize, ctx: &Arc<LoadContext>) -> Vec<Arc<Page>> {
        let files = (0..count)
            .map(|i| (format!("{i:02}.png"), png_bytes(32, 32)))
            .collect::<Vec<_>>();
        let files = files.iter().map(|(name, bytes)| (name.as_str(), bytes.clone())).collect();
        let (_, entries) = entries_of(MemorySource::new(files)).await;
        entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| Page::new(entry, index, Arc::clone(ctx)))
            .collect()
    }

    #[tokio::test]
    async fn test_page_ids_are_unique() {
        let ctx = Arc::new(LoadContext::default());
        let pages = book_pages(3, &ctx).await;
        assert_ne!(pages[0].id(), pages[1].id());
        assert_ne!(pages[1].id(), pages[2].id());
        assert_eq!(pages[2].index(), 2);
    }

    #[tokio::test]
    async fn test_locked_while_visible_or_busy() {
        let ctx = Arc::new(LoadContext::default());
        let page = book_pages(1, &ctx).await.remove(0);
        assert!(!page.is_locked());

        page.set_visible(true);
        assert!(page.is_locked());
        page.set_visible(false);

        {
            let _op = page.begin_operation();
            let _nested = page.begin_operation();
            assert_eq!(page.pending_operations(), 2);
            assert!(page.is_locked());
        }
        assert_eq!(page.pending_operations(), 0);
        assert!(!page.is_locked());
    }

    #[tokio::test]
    async fn test_deleted_inherited_from_entry() {
        let ctx = Arc::new(LoadContext::default());
        let page = book_pages(1, &ctx).await.remove(0);
        assert!(!page.is_deleted());

        page.entry().set_deleted(true);
        assert!(page.is_deleted());
        page.entry().set_deleted(false);

        page.set_deleted(true);
        assert!(page.is_deleted());
    }

    #[tokio::test]
    async fn test_visible_page_survives_cleanup() {
        let ctx = Arc::new(LoadContext::default());
        let pages = book_pages(2, &ctx).await;
        let token = CancellationToken::new();
        for page in &pages {
            assert_eq!(page.load_content(&token).await, ContentState::Loaded);
        }

        pages[1].set_visible(true);
        ctx.pool().cleanup();
        assert_eq!(pages[0].content_state(), ContentState::Unloaded);
        assert_eq!(pages[1].content_state(), ContentState::Loaded);
        assert_eq!(ctx.pool().total_size(), pages[1].content().data_size());
    }

    #[tokio::test]
    async fn test_owner_index_follows_display_index() {
        let ctx = Arc::new(LoadContext::default());
        let page = book_pages(1, &ctx).await.remove(0);
        page.set_index(7);
        assert_eq!(MemoryOwner::index(&*page), 7);
    }

    #[tokio::test]
    async fn test_cancelled_load_reports_current_state() {
        let source = MemorySource::new(vec![("a.png", png_bytes(8, 8))])
            .with_open_delay(Duration::from_secs(5));
        let (_, mut entries) = entries_of(source).await;
        let page = Page::new(entries.remove(0), 0, Arc::new(LoadContext::default()));

        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(page.load_content(&token).await, ContentState::Unloaded);
    }

    #[tokio::test]
    async fn test_misreported_entry_length_loads() {
        let source = MemorySource::new(vec![("a.png", png_bytes(8, 8))])
            .with_reported_length(u64::MAX);
        let (_, mut entries) = entries_of(source).await;
        let page = Page::new(entries.remove(0), 0, Arc::new(LoadContext::default()));

        let state = page.load_content(&CancellationToken::new()).await;
        assert_eq!(state, ContentState::Loaded);
        assert_eq!(page.size(), Size::new(8, 8));
    }

    #[tokio::test]
    async fn test_load_events_in_order() {
        let ctx = Arc::new(LoadContext::default());
        let page = book_pages(1, &ctx).await.remove(0);
        let mut events = page.subscribe();

        page.load_content(&CancellationToken::new()).await;
        assert_eq!(
            events.recv().await.unwrap(),
            PageEvent::ContentChanged(ContentState::Loaded)
        );
        assert_eq!(events.recv().await.unwrap(), PageEvent::SizeChanged(Size::new(32, 32)));
        assert_eq!(page.size(), Size::new(32, 32));
    }
}
