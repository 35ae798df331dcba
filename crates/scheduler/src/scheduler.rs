//! Job scheduler implementation
//!
//! Owns the priority queue, per-job cancellation tokens and statistics, and
//! wakes idle workers when new jobs arrive.

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::priority::{Job, JobId, JobPriority, JobType, PriorityQueue};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Job scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total jobs submitted
    pub jobs_submitted: u64,

    /// Total jobs completed
    pub jobs_completed: u64,

    /// Total jobs cancelled before they started
    pub jobs_cancelled: u64,

    /// Current queue size
    pub queue_size: usize,
}

impl SchedulerStats {
    /// Jobs submitted but neither completed nor cancelled
    pub fn pending_jobs(&self) -> u64 {
        self.jobs_submitted
            .saturating_sub(self.jobs_completed)
            .saturating_sub(self.jobs_cancelled)
    }
}

/// Job scheduler with priority queue
///
/// # Example
///
/// ```
/// use folio_scheduler::{JobPriority, JobScheduler, JobType};
///
/// let scheduler = JobScheduler::new();
///
/// let (job_id, token) = scheduler.submit(
///     JobPriority::Visible,
///     JobType::LoadContent { page_index: 0 },
/// );
///
/// if let Some(job) = scheduler.next_job() {
///     assert_eq!(job.id, job_id);
///     assert!(!token.is_cancelled());
///     scheduler.complete_job(job.id);
/// }
///
/// // Navigating away from a page drops its queued work
/// scheduler.cancel_page_jobs(0);
/// ```
pub struct JobScheduler {
    queue: PriorityQueue,
    stats: Mutex<SchedulerStats>,
    cancellation: CancellationRegistry,
    job_available: Notify,
}

impl JobScheduler {
    /// Create a new job scheduler
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            stats: Mutex::new(SchedulerStats::default()),
            cancellation: CancellationRegistry::new(),
            job_available: Notify::new(),
        }
    }

    /// Submit a job with its own cancellation token
    ///
    /// Returns a tuple of (job_id, cancellation_token).
    pub fn submit(&self, priority: JobPriority, job_type: JobType) -> (JobId, CancellationToken) {
        self.submit_inner(priority, job_type, None)
    }

    /// Submit a job whose token is a child of `parent`
    ///
    /// Cancelling the parent cancels the job whether queued or running.
    pub fn submit_child(
        &self,
        priority: JobPriority,
        job_type: JobType,
        parent: &CancellationToken,
    ) -> (JobId, CancellationToken) {
        self.submit_inner(priority, job_type, Some(parent))
    }

    fn submit_inner(
        &self,
        priority: JobPriority,
        job_type: JobType,
        parent: Option<&CancellationToken>,
    ) -> (JobId, CancellationToken) {
        // The token must exist before a worker can pop the job
        let job_id = self.queue.allocate_id();
        let token = match parent {
            Some(parent) => self.cancellation.register_child(job_id, parent),
            None => self.cancellation.register(job_id),
        };
        self.queue.push_with_id(job_id, priority, job_type);

        self.stats.lock().jobs_submitted += 1;
        trace!(job_id, ?priority, ?job_type, "Job submitted");
        self.job_available.notify_one();

        (job_id, token)
    }

    /// Get the next job to execute
    ///
    /// The job's token stays registered until `complete_job()` is called.
    pub fn next_job(&self) -> Option<Job> {
        self.queue.pop()
    }

    /// Wait until a job may be available
    ///
    /// Spurious wake-ups are possible; callers re-check with `next_job()`.
    pub async fn job_available(&self) {
        self.job_available.notified().await;
    }

    /// Mark a job as completed
    pub fn complete_job(&self, job_id: JobId) {
        self.stats.lock().jobs_completed += 1;
        self.cancellation.unregister(job_id);
    }

    /// Cancel a specific job by ID
    ///
    /// Queued jobs are removed; running jobs only see their token cancelled.
    /// Returns `true` if the job was found (either queued or running).
    pub fn cancel_job(&self, job_id: JobId) -> bool {
        let token_cancelled = self.cancellation.cancel(job_id);
        let removed = self.queue.remove_if(|job| job.id == job_id);

        if removed.is_empty() {
            token_cancelled
        } else {
            self.stats.lock().jobs_cancelled += removed.len() as u64;
            self.cancellation.unregister(job_id);
            debug!(job_id, "Cancelled queued job");
            true
        }
    }

    /// Cancel all queued jobs matching a predicate
    ///
    /// Returns the number of jobs cancelled.
    pub fn cancel_jobs_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Job) -> bool,
    {
        let removed = self.queue.remove_if(predicate);
        if removed.is_empty() {
            return 0;
        }

        let ids: Vec<JobId> = removed.iter().map(|job| job.id).collect();
        self.cancellation.cancel_many(&ids);
        for id in &ids {
            self.cancellation.unregister(*id);
        }
        self.stats.lock().jobs_cancelled += ids.len() as u64;
        debug!(count = ids.len(), "Cancelled queued jobs");

        ids.len()
    }

    /// Cancel all queued jobs for a specific page
    pub fn cancel_page_jobs(&self, page_index: usize) -> usize {
        self.cancel_jobs_if(|job| job.job_type.page_index() == page_index)
    }

    /// Get the current number of queued jobs
    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Check if the scheduler has any queued jobs
    pub fn has_pending_jobs(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Cancel everything, queued and running
    pub fn clear(&self) {
        let drained = self.queue.drain();
        let cancelled = self.cancellation.cancel_all();
        self.cancellation.clear();

        if !drained.is_empty() {
            self.stats.lock().jobs_cancelled += drained.len() as u64;
        }
        debug!(queued = drained.len(), tokens = cancelled, "Scheduler cleared");
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats.lock().clone();
        stats.queue_size = self.queue.len();
        stats
    }

    /// Peek at the next job without removing it
    pub fn peek_next_job(&self) -> Option<Job> {
        self.queue.peek()
    }

    /// All queued jobs in arbitrary order
    pub fn pending_jobs_list(&self) -> Vec<Job> {
        self.queue.jobs()
    }

    /// Get the cancellation token for a queued or running job
    pub fn get_cancellation_token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.cancellation.get(job_id)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}
