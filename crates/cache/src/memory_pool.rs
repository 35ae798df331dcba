//! Memory pool for resident page content
//!
//! Every decoded bitmap, raster or cached byte buffer that a page keeps in
//! memory is registered here as a [`MemoryElement`] under the
//! [`MemoryOwner`] that is charged for it. Elements of one owner form a
//! [`MemoryUnit`], and units are always evicted whole.
//!
//! The pool is an explicitly constructed object (usually one per viewer
//! session, shared through an `Arc`), never a global.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Identifier of a memory owner
pub type OwnerId = u64;

/// Something that resident memory is charged against (typically a page).
pub trait MemoryOwner: Send + Sync {
    /// Stable identifier, unique among live owners of one pool
    fn owner_id(&self) -> OwnerId;

    /// Returns true while the owner must not be evicted (e.g. visible)
    fn is_locked(&self) -> bool;

    /// Ordering hint used by eviction comparers (display index, recency)
    fn index(&self) -> i64;
}

/// A resident buffer that can report its size and release itself.
///
/// `unload` is invoked by the pool after the element has been deregistered,
/// outside of the pool lock. It must not block on the pool.
pub trait MemoryElement: Send + Sync {
    /// Size in bytes charged to the owner
    fn memory_size(&self) -> usize;

    /// Release the buffer
    fn unload(&self);
}

type ElementKey = usize;

fn element_key(element: &Arc<dyn MemoryElement>) -> ElementKey {
    Arc::as_ptr(element) as *const () as usize
}

struct Registered {
    element: Arc<dyn MemoryElement>,
    size: usize,
}

/// All elements registered for one owner
pub struct MemoryUnit {
    owner_id: OwnerId,
    owner: Weak<dyn MemoryOwner>,
    elements: Vec<Registered>,
    size: usize,
}

impl MemoryUnit {
    fn new(owner: &Arc<dyn MemoryOwner>) -> Self {
        Self {
            owner_id: owner.owner_id(),
            owner: Arc::downgrade(owner),
            elements: Vec::new(),
            size: 0,
        }
    }

    /// Owner identifier
    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    /// The owner, if it is still alive
    pub fn owner(&self) -> Option<Arc<dyn MemoryOwner>> {
        self.owner.upgrade()
    }

    /// Summed size of the unit's elements in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of elements in the unit
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check if the unit has no elements
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn unload_all(&self) {
        for registered in &self.elements {
            registered.element.unload();
        }
    }
}

/// Outcome of a cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Number of owner units evicted
    pub evicted_owners: usize,

    /// Number of elements unloaded
    pub evicted_elements: usize,

    /// Bytes released
    pub released_bytes: usize,

    /// Eviction stopped at a locked owner before reaching the limit
    pub halted_at_locked: bool,
}

/// Pool statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of owners with resident elements
    pub owner_count: usize,

    /// Number of registered elements
    pub element_count: usize,

    /// Total resident bytes
    pub total_size: usize,

    /// Owner units evicted since creation
    pub evictions: u64,

    /// Bytes released by eviction since creation
    pub released_bytes: u64,
}

struct PoolState {
    units: HashMap<OwnerId, MemoryUnit>,
    element_owners: HashMap<ElementKey, OwnerId>,
    total_size: usize,
    evictions: u64,
    released_bytes: u64,
}

impl PoolState {
    fn new() -> Self {
        Self {
            units: HashMap::new(),
            element_owners: HashMap::new(),
            total_size: 0,
            evictions: 0,
            released_bytes: 0,
        }
    }

    /// Deregister a whole unit and return it for unloading
    fn take_unit(&mut self, owner_id: OwnerId) -> Option<MemoryUnit> {
        let unit = self.units.remove(&owner_id)?;
        for registered in &unit.elements {
            self.element_owners.remove(&element_key(&registered.element));
        }
        self.total_size = self.total_size.saturating_sub(unit.size);
        self.evictions += 1;
        self.released_bytes += unit.size as u64;
        Some(unit)
    }

    /// Total must equal the sum of all unit sizes
    fn validate(&self) {
        if cfg!(debug_assertions) {
            let sum: usize = self.units.values().map(|unit| unit.size).sum();
            debug_assert_eq!(
                sum, self.total_size,
                "memory pool total out of sync with its units"
            );
            let elements: usize = self.units.values().map(|unit| unit.len()).sum();
            debug_assert_eq!(elements, self.element_owners.len());
        }
    }
}

/// Registry of resident memory grouped by owner
///
/// All bookkeeping happens under one coarse lock. Element `unload` actions
/// run after the lock is released so that an element may call back into its
/// content (which in turn may call [`MemoryPool::remove`]) without deadlock.
///
/// # Example
///
/// ```
/// use folio_cache::{order, MemoryElement, MemoryOwner, MemoryPool};
/// use std::sync::Arc;
///
/// struct Page(u64);
/// impl MemoryOwner for Page {
///     fn owner_id(&self) -> u64 { self.0 }
///     fn is_locked(&self) -> bool { false }
///     fn index(&self) -> i64 { self.0 as i64 }
/// }
///
/// struct Buffer(usize);
/// impl MemoryElement for Buffer {
///     fn memory_size(&self) -> usize { self.0 }
///     fn unload(&self) {}
/// }
///
/// let pool = MemoryPool::new();
/// let owner: Arc<dyn MemoryOwner> = Arc::new(Page(1));
/// pool.add(&owner, Arc::new(Buffer(1024)));
/// assert_eq!(pool.total_size(), 1024);
///
/// pool.cleanup_to(0, order::by_index);
/// assert_eq!(pool.total_size(), 0);
/// ```
pub struct MemoryPool {
    state: Mutex<PoolState>,
    next_owner_id: AtomicU64,
}

impl MemoryPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState::new()),
            next_owner_id: AtomicU64::new(1),
        }
    }

    /// Hand out an owner id that is unique within this pool
    pub fn allocate_owner_id(&self) -> OwnerId {
        self.next_owner_id.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Register an element under an owner
    ///
    /// Returns `false` without changing anything if the element is already
    /// registered (under any owner) or reports a zero size.
    pub fn add(&self, owner: &Arc<dyn MemoryOwner>, element: Arc<dyn MemoryElement>) -> bool {
        let size = element.memory_size();
        debug_assert!(size > 0, "memory elements must have a non-zero size");
        if size == 0 {
            warn!(owner = owner.owner_id(), "Refusing to register empty memory element");
            return false;
        }

        let key = element_key(&element);
        let owner_id = owner.owner_id();

        let mut state = self.state.lock();
        if let Some(existing) = state.element_owners.get(&key) {
            if *existing != owner_id {
                warn!(
                    owner = owner_id,
                    registered_owner = *existing,
                    "Memory element already belongs to another owner"
                );
            }
            return false;
        }

        let unit = state
            .units
            .entry(owner_id)
            .or_insert_with(|| MemoryUnit::new(owner));
        unit.elements.push(Registered { element, size });
        unit.size += size;
        state.element_owners.insert(key, owner_id);
        state.total_size += size;

        trace!(owner = owner_id, size, total = state.total_size, "Registered memory element");
        state.validate();
        true
    }

    /// Deregister a single element without unloading it
    ///
    /// Used by a content's own unload path. Returns `false` if the element
    /// was not registered (for instance because eviction already took it).
    pub fn remove(&self, element: &Arc<dyn MemoryElement>) -> bool {
        let key = element_key(element);

        let mut state = self.state.lock();
        let Some(owner_id) = state.element_owners.remove(&key) else {
            return false;
        };

        let mut released = 0;
        let mut now_empty = false;
        if let Some(unit) = state.units.get_mut(&owner_id) {
            if let Some(position) = unit
                .elements
                .iter()
                .position(|registered| element_key(&registered.element) == key)
            {
                let registered = unit.elements.swap_remove(position);
                unit.size -= registered.size;
                released = registered.size;
            }
            now_empty = unit.is_empty();
        }
        if now_empty {
            state.units.remove(&owner_id);
        }
        state.total_size = state.total_size.saturating_sub(released);

        trace!(owner = owner_id, released, total = state.total_size, "Removed memory element");
        state.validate();
        true
    }

    /// Deregister every element of an owner and unload them
    ///
    /// Returns the number of bytes released.
    pub fn remove_owner(&self, owner_id: OwnerId) -> usize {
        let unit = {
            let mut state = self.state.lock();
            let unit = state.take_unit(owner_id);
            state.validate();
            unit
        };

        match unit {
            Some(unit) => {
                unit.unload_all();
                unit.size
            }
            None => 0,
        }
    }

    /// Evict owner units until the total is at most `limit`
    ///
    /// Owners are visited in the order given by `compare` (first = evicted
    /// first). Owners that have been dropped are visited before all live
    /// owners. Eviction stops as soon as the total fits, or when the next
    /// candidate is locked: a locked owner is a hard boundary and is never
    /// skipped over.
    pub fn cleanup_to<F>(&self, limit: usize, mut compare: F) -> CleanupReport
    where
        F: FnMut(&dyn MemoryOwner, &dyn MemoryOwner) -> Ordering,
    {
        let mut report = CleanupReport::default();

        let victims = {
            let mut state = self.state.lock();
            if state.total_size <= limit {
                return report;
            }

            let mut candidates: Vec<(OwnerId, Option<Arc<dyn MemoryOwner>>)> = state
                .units
                .values()
                .map(|unit| (unit.owner_id, unit.owner()))
                .collect();
            candidates.sort_by(|a, b| match (&a.1, &b.1) {
                (None, None) => a.0.cmp(&b.0),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => compare(x.as_ref(), y.as_ref()),
            });

            let mut victims = Vec::new();
            for (owner_id, owner) in candidates {
                if state.total_size <= limit {
                    break;
                }
                if owner.as_ref().is_some_and(|owner| owner.is_locked()) {
                    debug!(owner = owner_id, total = state.total_size, limit, "Eviction halted at locked owner");
                    report.halted_at_locked = true;
                    break;
                }
                if let Some(unit) = state.take_unit(owner_id) {
                    victims.push(unit);
                }
            }

            state.validate();
            victims
        };

        for unit in &victims {
            debug!(owner = unit.owner_id, size = unit.size, elements = unit.len(), "Evicting memory unit");
            unit.unload_all();
            report.evicted_owners += 1;
            report.evicted_elements += unit.len();
            report.released_bytes += unit.size;
        }

        report
    }

    /// Evict every unit whose owner is not locked
    pub fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        let victims: Vec<MemoryUnit> = {
            let mut state = self.state.lock();
            let unlocked: Vec<OwnerId> = state
                .units
                .values()
                .filter(|unit| !unit.owner().is_some_and(|owner| owner.is_locked()))
                .map(|unit| unit.owner_id)
                .collect();
            report.halted_at_locked = unlocked.len() < state.units.len();

            let victims = unlocked
                .into_iter()
                .filter_map(|owner_id| state.take_unit(owner_id))
                .collect();
            state.validate();
            victims
        };

        for unit in &victims {
            unit.unload_all();
            report.evicted_owners += 1;
            report.evicted_elements += unit.len();
            report.released_bytes += unit.size;
        }

        if report.evicted_owners > 0 {
            debug!(
                owners = report.evicted_owners,
                bytes = report.released_bytes,
                "Released all unlocked memory"
            );
        }

        report
    }

    /// Total resident bytes
    pub fn total_size(&self) -> usize {
        self.state.lock().total_size
    }

    /// Bytes charged to one owner
    pub fn owner_size(&self, owner_id: OwnerId) -> usize {
        self.state
            .lock()
            .units
            .get(&owner_id)
            .map(|unit| unit.size)
            .unwrap_or(0)
    }

    /// Check if an element is currently registered
    pub fn contains(&self, element: &Arc<dyn MemoryElement>) -> bool {
        self.state.lock().element_owners.contains_key(&element_key(element))
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            owner_count: state.units.len(),
            element_count: state.element_owners.len(),
            total_size: state.total_size,
            evictions: state.evictions,
            released_bytes: state.released_bytes,
        }
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}
