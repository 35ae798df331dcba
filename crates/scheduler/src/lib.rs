//! Folio Scheduler Library
//!
//! Cancellation scopes, a priority job queue and an async worker pool for
//! page loads.
//!
//! Jobs are ordered by priority (visible pages, prefetch, thumbnails) and
//! dequeued in FIFO order within each priority level. Every job carries a
//! [`CancellationToken`] that can be linked to a parent scope so that
//! closing a book cancels everything it queued.
//!
//! # Example
//!
//! ```
//! use folio_scheduler::{JobPriority, JobScheduler, JobType};
//!
//! let scheduler = JobScheduler::new();
//!
//! let (job_id, token) = scheduler.submit(
//!     JobPriority::Visible,
//!     JobType::LoadContent { page_index: 0 },
//! );
//!
//! if let Some(job) = scheduler.next_job() {
//!     // Worker checks token.is_cancelled() or awaits token.cancelled()
//!     scheduler.complete_job(job.id);
//! }
//! # let _ = (job_id, token);
//! ```

mod cancel;
mod priority;
mod scheduler;
mod worker;

pub use cancel::{Cancelled, CancellationRegistry, CancellationToken};
pub use priority::{Job, JobId, JobPriority, JobType, PriorityQueue};
pub use scheduler::{JobScheduler, SchedulerStats};
pub use worker::{num_cpus, JobExecutor, WorkerPool, WorkerPoolConfig};
