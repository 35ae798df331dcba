//! Priority queue for page load jobs
//!
//! Jobs are dequeued by priority first (visible pages before prefetch before
//! thumbnails), then in submission order within one priority level.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Job priority levels
///
/// Higher numeric values have higher priority and are executed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// Thumbnail strip (lowest priority)
    Thumbnail = 0,

    /// Pages near the visible range
    Prefetch = 1,

    /// Pages currently on screen
    Visible = 2,
}

/// Unique job identifier
pub type JobId = u64;

/// Job type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    /// Load the full content of a page
    LoadContent { page_index: usize },

    /// Load the thumbnail of a page
    LoadThumbnail { page_index: usize },
}

impl JobType {
    /// Index of the page the job works on
    pub fn page_index(&self) -> usize {
        match self {
            JobType::LoadContent { page_index } | JobType::LoadThumbnail { page_index } => {
                *page_index
            }
        }
    }
}

/// A scheduled job with priority
///
/// Jobs are ordered by priority (higher priority first), then by insertion order
/// (earlier jobs first) to ensure FIFO ordering within the same priority level.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Job priority level
    pub priority: JobPriority,

    /// Job type and parameters
    pub job_type: JobType,

    insertion_order: u64,
}

impl Job {
    /// Create a new job
    pub fn new(id: JobId, priority: JobPriority, job_type: JobType, insertion_order: u64) -> Self {
        Self {
            id,
            priority,
            job_type,
            insertion_order,
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap, so earlier insertions must compare greater
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.insertion_order.cmp(&self.insertion_order))
    }
}

/// Thread-safe priority queue of jobs
pub struct PriorityQueue {
    state: Mutex<QueueState>,
}

struct QueueState {
    heap: BinaryHeap<Job>,
    next_job_id: JobId,
    insertion_counter: u64,
}

impl PriorityQueue {
    /// Create a new empty priority queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_job_id: 1,
                insertion_counter: 0,
            }),
        }
    }

    /// Push a job and return its assigned id
    pub fn push(&self, priority: JobPriority, job_type: JobType) -> JobId {
        let job_id = self.allocate_id();
        self.push_with_id(job_id, priority, job_type);
        job_id
    }

    /// Reserve a job id without queueing anything
    pub fn allocate_id(&self) -> JobId {
        let mut state = self.state.lock();
        let job_id = state.next_job_id;
        state.next_job_id += 1;
        job_id
    }

    /// Queue a job under an id from [`allocate_id`](Self::allocate_id)
    pub fn push_with_id(&self, job_id: JobId, priority: JobPriority, job_type: JobType) {
        let mut state = self.state.lock();
        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        state
            .heap
            .push(Job::new(job_id, priority, job_type, insertion_order));
    }

    /// Pop the highest priority job
    pub fn pop(&self) -> Option<Job> {
        self.state.lock().heap.pop()
    }

    /// Peek at the highest priority job without removing it
    pub fn peek(&self) -> Option<Job> {
        self.state.lock().heap.peek().cloned()
    }

    /// Get the number of queued jobs
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }

    /// Remove every job and return them
    pub fn drain(&self) -> Vec<Job> {
        self.state.lock().heap.drain().collect()
    }

    /// Remove all jobs matching a predicate and return them
    pub fn remove_if<F>(&self, predicate: F) -> Vec<Job>
    where
        F: Fn(&Job) -> bool,
    {
        let mut state = self.state.lock();
        let (removed, remaining): (Vec<Job>, Vec<Job>) =
            state.heap.drain().partition(|job| predicate(job));
        state.heap = remaining.into_iter().collect();
        removed
    }

    /// All queued jobs in arbitrary order
    pub fn jobs(&self) -> Vec<Job> {
        self.state.lock().heap.iter().cloned().collect()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}
