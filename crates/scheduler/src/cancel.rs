//! Cancellation scopes for page loads
//!
//! A [`CancellationToken`] is threaded from the original request through
//! every layer of a load (stream, loader, decoder). Layers either poll it
//! with [`CancellationToken::check`] between steps or race their own work
//! against [`CancellationToken::cancelled`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};
use tokio::sync::Notify;
use tracing::trace;

use crate::JobId;

/// Error returned when an operation observes a cancelled token
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new(cancelled: bool) -> Self {
        Self {
            cancelled: AtomicBool::new(cancelled),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notify.notify_waiters();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cancellation token for cooperative load cancellation
///
/// Clones share the same state. A token made with
/// [`child_token`](Self::child_token) is cancelled whenever its parent is,
/// but cancelling the child leaves the parent untouched, which lets a book
/// hand every page load its own scope under one "cancel all" parent.
///
/// # Example
///
/// ```
/// use folio_scheduler::CancellationToken;
///
/// let book = CancellationToken::new();
/// let page = book.child_token();
///
/// page.cancel();
/// assert!(!book.is_cancelled());
///
/// let other = book.child_token();
/// book.cancel();
/// assert!(other.is_cancelled());
/// assert!(other.check().is_err());
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a new cancellation token
    ///
    /// The token starts in a non-cancelled state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new(false)),
        }
    }

    /// Cancel this token and every child token
    ///
    /// Idempotent. Wakes every task awaiting [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check if this token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Return `Err(Cancelled)` if the token has been cancelled
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Reset this token to non-cancelled state
    ///
    /// Children cancelled earlier stay cancelled and are no longer linked.
    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::Release);
    }

    /// Create a token that is cancelled together with this one
    pub fn child_token(&self) -> CancellationToken {
        let child = Arc::new(Inner::new(self.is_cancelled()));
        {
            let mut children = self.inner.children.lock();
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        // A cancel racing with the push above may have drained the list first
        if self.is_cancelled() {
            child.cancel();
        }
        Self { inner: child }
    }

    /// Wait until the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancellation token registry for tracking active jobs and loads
///
/// Associates ids with cancellation tokens so that work can be cancelled by
/// id. The scheduler registers jobs here, and a book registers its
/// in-flight page loads.
///
/// # Example
///
/// ```
/// use folio_scheduler::{CancellationRegistry, JobId};
///
/// let registry = CancellationRegistry::new();
///
/// let job_id: JobId = 1;
/// let token = registry.register(job_id);
///
/// registry.cancel(job_id);
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl CancellationRegistry {
    /// Create a new empty cancellation registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an id with a fresh token and return the token
    pub fn register(&self, id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(id, token.clone());
        token
    }

    /// Register an id with a child of `parent` and return the child
    pub fn register_child(&self, id: JobId, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        self.tokens.lock().insert(id, token.clone());
        token
    }

    /// Cancel by id
    ///
    /// Returns `true` if the id was found and cancelled.
    pub fn cancel(&self, id: JobId) -> bool {
        let token = self.tokens.lock().get(&id).cloned();
        match token {
            Some(token) => {
                trace!(id, "Cancelling registered token");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel multiple ids
    ///
    /// Returns the number of ids that were found and cancelled.
    pub fn cancel_many(&self, ids: &[JobId]) -> usize {
        let tokens: Vec<CancellationToken> = {
            let registered = self.tokens.lock();
            ids.iter().filter_map(|id| registered.get(id).cloned()).collect()
        };
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    /// Cancel all registered tokens
    ///
    /// Returns the number of tokens cancelled.
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<CancellationToken> = self.tokens.lock().values().cloned().collect();
        for token in &tokens {
            token.cancel();
        }
        tokens.len()
    }

    /// Unregister an id (called when the work completes)
    ///
    /// Returns `true` if the id was found.
    pub fn unregister(&self, id: JobId) -> bool {
        self.tokens.lock().remove(&id).is_some()
    }

    /// Get the token registered for an id
    pub fn get(&self, id: JobId) -> Option<CancellationToken> {
        self.tokens.lock().get(&id).cloned()
    }

    /// Get the number of registered tokens
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }

    /// Remove all registered tokens without cancelling them
    pub fn clear(&self) {
        self.tokens.lock().clear();
    }
}
