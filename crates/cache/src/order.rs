//! Owner eviction orderings
//!
//! Comparers for [`MemoryPool::cleanup_to`](crate::MemoryPool::cleanup_to).
//! An owner that compares `Less` is evicted first.

use crate::memory_pool::MemoryOwner;
use std::cmp::Ordering;

/// Ascending index: lowest index (oldest / earliest page) evicted first
pub fn by_index(a: &dyn MemoryOwner, b: &dyn MemoryOwner) -> Ordering {
    a.index()
        .cmp(&b.index())
        .then_with(|| a.owner_id().cmp(&b.owner_id()))
}

/// Distance from `center`: furthest owner evicted first
///
/// Equal distances prefer evicting the owner behind the center.
pub fn by_distance_from(
    center: i64,
) -> impl FnMut(&dyn MemoryOwner, &dyn MemoryOwner) -> Ordering {
    move |a, b| {
        let da = a.index().abs_diff(center);
        let db = b.index().abs_diff(center);
        db.cmp(&da)
            .then_with(|| a.index().cmp(&b.index()))
            .then_with(|| a.owner_id().cmp(&b.owner_id()))
    }
}
