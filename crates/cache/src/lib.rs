//! Folio Cache Library
//!
//! Memory accounting for decoded page content: a pool of resident buffers
//! grouped by owner, owner eviction orderings, and a budget that turns pool
//! usage into a pressure level.

pub mod budget;
pub mod memory_pool;
pub mod order;

pub use budget::{BudgetCheck, MemoryBudget, MemoryBudgetConfig, MemoryPressure};
pub use memory_pool::{
    CleanupReport, MemoryElement, MemoryOwner, MemoryPool, MemoryUnit, OwnerId, PoolStats,
};
