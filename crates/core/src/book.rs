//! Books: an opened source and its pages.
//!
//! A [`Book`] enumerates an [`ArchiveSource`] into pages, loads them in
//! bounded parallel batches or through the job scheduler's worker pool, and
//! trims the shared memory pool against its budget after every load.

use crate::archive::{self, enumerate, ArchiveSource};
use crate::content::ContentState;
use crate::context::LoadContext;
use crate::error::{BatchError, LoadResult, PageOpError};
use crate::page::{Page, PageId};
use folio_cache::order::by_distance_from;
use folio_cache::{CleanupReport, MemoryBudget};
use folio_scheduler::{
    CancellationRegistry, CancellationToken, Job, JobExecutor, JobId, JobPriority, JobScheduler,
    JobType, WorkerPool,
};
use futures::{stream, FutureExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Outcome of [`Book::load_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Pages of one opened source
///
/// Cloning yields another handle to the same book. Must be opened from
/// within a tokio runtime.
#[derive(Clone)]
pub struct Book {
    inner: Arc<BookInner>,
}

struct BookInner {
    source: Arc<dyn ArchiveSource>,
    ctx: Arc<LoadContext>,
    pages: RwLock<Vec<Arc<Page>>>,
    scheduler: Arc<JobScheduler>,
    workers: Mutex<Option<WorkerPool>>,
    /// In-flight loads started by `load_all`
    loads: CancellationRegistry,
    /// Parent of every scheduled job; cancelled on close
    scope: CancellationToken,
    budget: MemoryBudget,
    current: AtomicUsize,
    /// Bumped by `cancel_all` so queued batch loads never start
    epoch: AtomicU64,
    next_load: AtomicU64,
}

impl Book {
    /// Open a source and build one page per entry
    ///
    /// # Arguments
    /// * `source` - Folder, archive or PDF to read pages from
    /// * `ctx` - Shared pool, decoders and configuration
    /// * `token` - Cancels the entry enumeration
    pub async fn open(
        source: Arc<dyn ArchiveSource>,
        ctx: Arc<LoadContext>,
        token: &CancellationToken,
    ) -> LoadResult<Self> {
        let entries = enumerate(&source, token).await?;
        let pages: Vec<_> = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| Page::new(entry, index, Arc::clone(&ctx)))
            .collect();

        info!(source = source.name(), pages = pages.len(), "Book opened");

        let inner = Arc::new(BookInner {
            budget: MemoryBudget::new(ctx.config().memory_budget()),
            source,
            pages: RwLock::new(pages),
            scheduler: Arc::new(JobScheduler::new()),
            workers: Mutex::new(None),
            loads: CancellationRegistry::new(),
            scope: CancellationToken::new(),
            current: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            next_load: AtomicU64::new(0),
            ctx,
        });

        let book = Arc::downgrade(&inner);
        let executor: JobExecutor = Arc::new(move |job: Job, token: CancellationToken| {
            let book: Weak<BookInner> = book.clone();
            async move {
                if let Some(book) = book.upgrade() {
                    book.run_job(job, token).await;
                }
            }
            .boxed()
        });
        let workers = WorkerPool::new(
            Arc::clone(&inner.scheduler),
            executor,
            inner.ctx.config().worker_pool(),
        );
        *inner.workers.lock() = Some(workers);

        Ok(Self { inner })
    }

    /// Open a folder, ZIP archive or PDF from disk
    pub async fn open_path(
        path: impl AsRef<Path>,
        ctx: Arc<LoadContext>,
        token: &CancellationToken,
    ) -> LoadResult<Self> {
        let source = archive::open_path(path).await?;
        Self::open(source, ctx, token).await
    }

    pub fn name(&self) -> &str {
        self.inner.source.name()
    }

    pub fn context(&self) -> &Arc<LoadContext> {
        &self.inner.ctx
    }

    pub fn len(&self) -> usize {
        self.inner.pages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pages.read().is_empty()
    }

    /// Snapshot of the pages in display order
    pub fn pages(&self) -> Vec<Arc<Page>> {
        self.inner.pages.read().clone()
    }

    pub fn page(&self, index: usize) -> Option<Arc<Page>> {
        self.inner.page_at(index)
    }

    pub fn page_by_id(&self, id: PageId) -> Option<Arc<Page>> {
        self.inner
            .pages
            .read()
            .iter()
            .find(|page| page.id() == id)
            .cloned()
    }

    /// Index eviction distances are measured from
    pub fn current_index(&self) -> usize {
        self.inner.current.load(Ordering::Relaxed)
    }

    pub fn set_current_index(&self, index: usize) {
        self.inner.current.store(index, Ordering::Relaxed);
    }

    /// Number of scheduled jobs not yet picked up by a worker
    pub fn pending_jobs(&self) -> usize {
        self.inner.scheduler.pending_jobs()
    }

    /// Load every page, at most `load_workers` at a time
    ///
    /// Pages that were not loaded because `token` fired or `cancel_all` ran
    /// are counted as cancelled.
    pub async fn load_all(&self, token: &CancellationToken) -> LoadSummary {
        let pages = self.pages();
        let epoch = self.inner.epoch.load(Ordering::Acquire);
        let parallelism = self.inner.ctx.config().load_workers.max(1);

        let states: Vec<ContentState> = stream::iter(pages)
            .map(|page| self.inner.load_page(page, epoch, token))
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut summary = LoadSummary::default();
        for state in states {
            match state {
                ContentState::Loaded => summary.loaded += 1,
                ContentState::Failed => summary.failed += 1,
                ContentState::Unloaded | ContentState::Loading => summary.cancelled += 1,
            }
        }
        info!(
            loaded = summary.loaded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Book load finished"
        );
        summary
    }

    /// Queue content loads for the worker pool
    ///
    /// Indices past the end are ignored. Returns the ids of the submitted
    /// jobs.
    pub fn request_pages(&self, indices: &[usize], priority: JobPriority) -> Vec<JobId> {
        self.inner.submit(indices, priority, |page_index| JobType::LoadContent { page_index })
    }

    /// Queue thumbnail loads for the worker pool
    pub fn request_thumbnails(&self, indices: &[usize]) -> Vec<JobId> {
        self.inner.submit(indices, JobPriority::Thumbnail, |page_index| {
            JobType::LoadThumbnail { page_index }
        })
    }

    pub fn cancel_job(&self, id: JobId) -> bool {
        self.inner.scheduler.cancel_job(id)
    }

    /// Mark the pages in `range` visible and everything else hidden
    ///
    /// The range start becomes the current index. Queued visible-priority
    /// jobs for pages that left the range are cancelled.
    pub fn set_visible_range(&self, range: Range<usize>) {
        for (index, page) in self.inner.pages.read().iter().enumerate() {
            page.set_visible(range.contains(&index));
        }
        self.inner.current.store(range.start, Ordering::Relaxed);

        let stale = self.inner.scheduler.cancel_jobs_if(|job| {
            job.priority == JobPriority::Visible && !range.contains(&job.job_type.page_index())
        });
        debug!(start = range.start, end = range.end, stale, "Visible range changed");
    }

    /// Evict content until the pool is back under budget
    ///
    /// Pages furthest from the current index go first; visible pages and
    /// pages with pending operations stop the pass.
    pub fn trim_memory(&self) -> CleanupReport {
        self.inner.trim_memory()
    }

    /// Cancel every pending and running load of this book
    pub fn cancel_all(&self) {
        self.inner.cancel_all();
    }

    /// Remove pages from the book and release their memory
    ///
    /// Every removable page is removed even when others fail; the failures
    /// are reported together. Pages with operations in progress are busy.
    pub fn remove_pages(&self, ids: &[PageId]) -> Result<usize, BatchError> {
        let mut failures = Vec::new();
        let mut removed = Vec::new();

        {
            let mut pages = self.inner.pages.write();
            let mut first_shifted = usize::MAX;
            for &id in ids {
                match pages.iter().position(|page| page.id() == id) {
                    None => failures.push(PageOpError::NotFound(id)),
                    Some(position) if pages[position].pending_operations() > 0 => {
                        failures.push(PageOpError::Busy(id))
                    }
                    Some(position) => {
                        first_shifted = first_shifted.min(position);
                        removed.push(pages.remove(position));
                    }
                }
            }
            for (index, page) in pages.iter().enumerate().skip(first_shifted) {
                page.set_index(index);
            }
            if first_shifted != usize::MAX {
                // Queued jobs address pages by index
                self.inner
                    .scheduler
                    .cancel_jobs_if(|job| job.job_type.page_index() >= first_shifted);
            }
        }

        let pool = self.inner.ctx.pool();
        for page in &removed {
            page.set_deleted(true);
            page.unload();
            pool.remove_owner(page.id());
        }
        debug!(removed = removed.len(), failed = failures.len(), "Pages removed");

        if failures.is_empty() {
            Ok(removed.len())
        } else {
            Err(BatchError {
                attempted: ids.len(),
                failures,
            })
        }
    }

    /// Cancel outstanding work, stop the workers and release all content
    pub async fn close(self) {
        self.inner.scope.cancel();
        self.inner.cancel_all();

        let workers = self.inner.workers.lock().take();
        if let Some(workers) = workers {
            workers.shutdown().await;
        }

        let pages = std::mem::take(&mut *self.inner.pages.write());
        let pool = self.inner.ctx.pool();
        for page in &pages {
            page.unload();
            pool.remove_owner(page.id());
        }
        info!(source = self.inner.source.name(), pages = pages.len(), "Book closed");
    }
}

impl std::fmt::Debug for Book {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Book")
            .field("source", &self.inner.source.name())
            .field("pages", &self.len())
            .field("current", &self.current_index())
            .finish()
    }
}

impl BookInner {
    fn page_at(&self, index: usize) -> Option<Arc<Page>> {
        self.pages.read().get(index).cloned()
    }

    async fn load_page(
        &self,
        page: Arc<Page>,
        epoch: u64,
        parent: &CancellationToken,
    ) -> ContentState {
        if parent.is_cancelled() || self.epoch.load(Ordering::Acquire) != epoch {
            return page.content_state();
        }

        let id = self.next_load.fetch_add(1, Ordering::Relaxed);
        let token = self.loads.register_child(id, parent);
        // cancel_all may have run between the epoch check and registration
        if self.epoch.load(Ordering::Acquire) != epoch {
            token.cancel();
        }

        let state = page.load_content(&token).await;
        self.loads.unregister(id);

        if state == ContentState::Loaded {
            self.trim_memory();
        }
        state
    }

    fn submit(
        &self,
        indices: &[usize],
        priority: JobPriority,
        job_type: impl Fn(usize) -> JobType,
    ) -> Vec<JobId> {
        let len = self.pages.read().len();
        indices
            .iter()
            .filter(|&&index| index < len)
            .map(|&index| {
                let (id, _) = self
                    .scheduler
                    .submit_child(priority, job_type(index), &self.scope);
                id
            })
            .collect()
    }

    async fn run_job(&self, job: Job, token: CancellationToken) {
        let page_index = job.job_type.page_index();
        let Some(page) = self.page_at(page_index) else {
            debug!(job_id = job.id, page_index, "Job for a missing page");
            return;
        };

        match job.job_type {
            JobType::LoadContent { .. } => {
                if page.load_content(&token).await == ContentState::Loaded {
                    self.trim_memory();
                }
            }
            JobType::LoadThumbnail { .. } => {
                page.load_thumbnail(&token).await;
            }
        }
    }

    fn trim_memory(&self) -> CleanupReport {
        let pool = self.ctx.pool();
        let check = self.budget.evaluate(pool.total_size());
        if !check.needs_eviction() {
            return CleanupReport::default();
        }

        let center = self.current.load(Ordering::Relaxed) as i64;
        let report = pool.cleanup_to(check.target_bytes, by_distance_from(center));
        debug!(
            pressure = ?check.pressure,
            evicted = report.evicted_owners,
            released = report.released_bytes,
            halted = report.halted_at_locked,
            "Trimmed memory"
        );
        report
    }

    fn cancel_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let loads = self.loads.cancel_all();
        self.scheduler.clear();
        debug!(loads, "Cancelled all loads");
    }
}

impl Drop for BookInner {
    fn drop(&mut self) {
        self.scope.cancel();
        if let Some(workers) = self.workers.get_mut().take() {
            workers.shutdown_nowait();
        }
    }
}
