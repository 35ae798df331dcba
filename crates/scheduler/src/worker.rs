//! Async worker pool for page load jobs.
//!
//! Workers are tokio tasks that pull jobs from the [`JobScheduler`], run
//! them through an async executor callback and mark them complete. Idle
//! workers park on the scheduler's wake-up signal, falling back to a poll
//! interval so a missed wake-up only costs latency.

use crate::{CancellationToken, Job, JobScheduler};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback for job execution.
///
/// Receives the job and its cancellation token and returns the future that
/// performs the work. The future should stop early once the token is
/// cancelled.
pub type JobExecutor = Arc<dyn Fn(Job, CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    /// Default: number of logical CPU cores.
    pub num_workers: usize,

    /// Maximum time an idle worker waits before re-checking the queue.
    /// Default: 100ms.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::new(num_cpus())
    }
}

impl WorkerPoolConfig {
    /// Create a new worker pool configuration.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Set the poll interval for workers.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Worker pool for parallel job execution.
///
/// Must be created from within a tokio runtime.
///
/// # Example
///
/// ```
/// use folio_scheduler::{JobExecutor, JobPriority, JobScheduler, JobType, WorkerPool, WorkerPoolConfig};
/// use futures::FutureExt;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let scheduler = Arc::new(JobScheduler::new());
///
/// let executor: JobExecutor = Arc::new(|job, token| {
///     async move {
///         if token.is_cancelled() {
///             return;
///         }
///         println!("Loading page {}", job.job_type.page_index());
///     }
///     .boxed()
/// });
///
/// let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2));
/// scheduler.submit(JobPriority::Visible, JobType::LoadContent { page_index: 0 });
///
/// pool.shutdown().await;
/// # }
/// ```
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Create and start a new worker pool.
    pub fn new(
        scheduler: Arc<JobScheduler>,
        executor: JobExecutor,
        config: WorkerPoolConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let workers = (0..config.num_workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    scheduler.clone(),
                    executor.clone(),
                    shutdown.clone(),
                    config.poll_interval,
                ))
            })
            .collect();

        debug!(workers = config.num_workers, "Worker pool started");
        Self { workers, shutdown }
    }

    /// Get the number of workers.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Check if the worker pool is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Shut the pool down gracefully.
    ///
    /// Idle workers exit immediately; busy workers finish their current job
    /// first. Resolves once every worker has exited.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for (id, worker) in self.workers.into_iter().enumerate() {
            if let Err(err) = worker.await {
                warn!(worker = id, error = %err, "Worker task ended abnormally");
            }
        }
        debug!("Worker pool stopped");
    }

    /// Signal shutdown without waiting for workers to exit.
    pub fn shutdown_nowait(self) {
        self.shutdown.cancel();
    }
}

async fn run_worker(
    id: usize,
    scheduler: Arc<JobScheduler>,
    executor: JobExecutor,
    shutdown: CancellationToken,
    poll_interval: Duration,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        if let Some(job) = scheduler.next_job() {
            let job_id = job.id;
            // A job without a registered token was cleared from the scheduler
            match scheduler.get_cancellation_token(job_id) {
                Some(token) if !token.is_cancelled() => executor(job, token).await,
                _ => debug!(worker = id, job_id, "Skipping cancelled job"),
            }

            scheduler.complete_job(job_id);
            continue;
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = scheduler.job_available() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Get the number of logical CPU cores.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobPriority, JobType};
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn content(page_index: usize) -> JobType {
        JobType::LoadContent { page_index }
    }

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert!(config.num_workers > 0);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(4).with_poll_interval(Duration::from_millis(50));
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(50));

        assert_eq!(WorkerPoolConfig::new(0).num_workers, 1);
    }

    #[tokio::test]
    async fn test_worker_pool_creation() {
        let scheduler = Arc::new(JobScheduler::new());
        let executor: JobExecutor = Arc::new(|_job, _token| async {}.boxed());

        let pool = WorkerPool::new(scheduler, executor, WorkerPoolConfig::new(2));
        assert_eq!(pool.num_workers(), 2);
        assert!(!pool.is_shutting_down());

        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_pool_executes_jobs() {
        let scheduler = Arc::new(JobScheduler::new());
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();

        let executor: JobExecutor = Arc::new(move |_job, _token| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(2));
        for i in 0..5 {
            scheduler.submit(JobPriority::Visible, content(i));
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while executed.load(Ordering::SeqCst) < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        pool.shutdown().await;
        assert_eq!(scheduler.stats().jobs_completed, 5);
    }

    #[tokio::test]
    async fn test_worker_pool_skips_cancelled_jobs() {
        let scheduler = Arc::new(JobScheduler::new());
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();

        let executor: JobExecutor = Arc::new(move |_job, _token| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        // Tokens cancelled through a parent stay queued but must not run
        let parent = CancellationToken::new();
        scheduler.submit_child(JobPriority::Visible, content(0), &parent);
        scheduler.submit_child(JobPriority::Visible, content(1), &parent);
        parent.cancel();

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(1));
        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.stats().jobs_completed < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pool.shutdown().await;

        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_worker_pool_skips_jobs_without_token() {
        let scheduler = Arc::new(JobScheduler::new());
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();

        let executor: JobExecutor = Arc::new(move |_job, _token| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        // Unregistering leaves the job queued with no token behind it
        let (job_id, _token) = scheduler.submit(JobPriority::Visible, content(0));
        scheduler.complete_job(job_id);
        assert!(scheduler.get_cancellation_token(job_id).is_none());

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(1));
        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.has_pending_jobs() || scheduler.stats().jobs_completed < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pool.shutdown().await;

        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_worker_pool_priority_ordering() {
        let scheduler = Arc::new(JobScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let recorder = order.clone();

        let executor: JobExecutor = Arc::new(move |job, _token| {
            recorder.lock().push(job.job_type.page_index());
            async {}.boxed()
        });

        scheduler.submit(JobPriority::Thumbnail, JobType::LoadThumbnail { page_index: 3 });
        scheduler.submit(JobPriority::Visible, content(1));
        scheduler.submit(JobPriority::Prefetch, content(2));

        let pool = WorkerPool::new(scheduler.clone(), executor, WorkerPoolConfig::new(1));
        tokio::time::timeout(Duration::from_secs(5), async {
            while order.lock().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pool.shutdown().await;

        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_worker_pool_shutdown_while_idle() {
        let scheduler = Arc::new(JobScheduler::new());
        let executor: JobExecutor = Arc::new(|_job, _token| async {}.boxed());

        let pool = WorkerPool::new(
            scheduler,
            executor,
            WorkerPoolConfig::new(2).with_poll_interval(Duration::from_secs(60)),
        );

        tokio::time::timeout(Duration::from_secs(1), pool.shutdown())
            .await
            .unwrap();
    }

    #[test]
    fn test_num_cpus() {
        assert!(num_cpus() > 0);
    }
}
