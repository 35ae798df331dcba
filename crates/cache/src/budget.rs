//! Memory budget policy for the memory pool
//!
//! The pool only knows how to evict down to a limit. This module decides
//! when that should happen: it turns the pool's resident total into a
//! pressure level and, past the warning threshold, into an eviction target.

use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info};

/// Memory pressure level indicating pool health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    /// Memory usage is low (< 50% utilization)
    Low,
    /// Memory usage is moderate (50-75% utilization)
    Moderate,
    /// Memory usage is high (75-90% utilization)
    High,
    /// Memory usage is critical (>= 90% utilization)
    Critical,
}

impl MemoryPressure {
    /// Get the memory pressure level from a utilization ratio (0.0 to 1.0)
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization < 0.5 {
            MemoryPressure::Low
        } else if utilization < 0.75 {
            MemoryPressure::Moderate
        } else if utilization < 0.90 {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// Returns true if memory pressure requires action (High or Critical)
    pub fn needs_eviction(&self) -> bool {
        matches!(self, MemoryPressure::High | MemoryPressure::Critical)
    }

    fn to_u8(self) -> u8 {
        match self {
            MemoryPressure::Low => 0,
            MemoryPressure::Moderate => 1,
            MemoryPressure::High => 2,
            MemoryPressure::Critical => 3,
        }
    }
}

/// Configuration for memory budget thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudgetConfig {
    /// Total resident memory allowed for decoded content, in bytes
    pub total_budget: usize,
    /// Eviction starts once usage exceeds this share of the budget
    pub warning_threshold: f64,
    /// Usage above this share is logged as critical
    pub critical_threshold: f64,
    /// Utilization to evict down to (0.0 to 1.0)
    pub target_utilization: f64,
}

impl Default for MemoryBudgetConfig {
    fn default() -> Self {
        Self {
            total_budget: 512 * 1024 * 1024,
            warning_threshold: 0.85,
            critical_threshold: 0.95,
            target_utilization: 0.80,
        }
    }
}

impl MemoryBudgetConfig {
    /// Create a configuration with a budget in megabytes
    pub fn new(total_budget_mb: usize) -> Self {
        Self {
            total_budget: total_budget_mb * 1024 * 1024,
            ..Default::default()
        }
    }

    /// Set the total budget in bytes
    pub fn with_total_budget(mut self, bytes: usize) -> Self {
        self.total_budget = bytes;
        self
    }

    /// Set the warning threshold (0.0 to 1.0)
    pub fn with_warning_threshold(mut self, threshold: f64) -> Self {
        self.warning_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the critical threshold (0.0 to 1.0)
    pub fn with_critical_threshold(mut self, threshold: f64) -> Self {
        self.critical_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the target utilization after eviction (0.0 to 1.0)
    pub fn with_target_utilization(mut self, target: f64) -> Self {
        self.target_utilization = target.clamp(0.0, 1.0);
        self
    }

    /// Get the warning threshold in bytes
    pub fn warning_bytes(&self) -> usize {
        (self.total_budget as f64 * self.warning_threshold) as usize
    }

    /// Get the critical threshold in bytes
    pub fn critical_bytes(&self) -> usize {
        (self.total_budget as f64 * self.critical_threshold) as usize
    }

    /// Get the target bytes after eviction
    pub fn target_bytes(&self) -> usize {
        (self.total_budget as f64 * self.target_utilization) as usize
    }
}

/// Result of evaluating a usage figure against the budget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetCheck {
    /// Pressure level at the evaluated usage
    pub pressure: MemoryPressure,
    /// Bytes that should be released (0 below the warning threshold)
    pub bytes_to_evict: usize,
    /// Limit to pass to the pool's cleanup
    pub target_bytes: usize,
}

impl BudgetCheck {
    /// Returns true if the pool should be cleaned up
    pub fn needs_eviction(&self) -> bool {
        self.bytes_to_evict > 0
    }
}

/// Memory budget for the memory pool
///
/// Stateless apart from the last observed pressure, which is kept so that
/// level changes are logged once rather than on every evaluation.
///
/// # Example
///
/// ```
/// use folio_cache::{MemoryBudget, MemoryBudgetConfig, MemoryPressure};
///
/// let budget = MemoryBudget::new(MemoryBudgetConfig::new(100));
///
/// let check = budget.evaluate(95 * 1024 * 1024);
/// assert_eq!(check.pressure, MemoryPressure::Critical);
/// assert!(check.needs_eviction());
/// assert_eq!(check.target_bytes, 80 * 1024 * 1024);
/// ```
#[derive(Debug)]
pub struct MemoryBudget {
    config: MemoryBudgetConfig,
    last_pressure: AtomicU8,
}

impl MemoryBudget {
    /// Create a new memory budget with the given configuration
    pub fn new(config: MemoryBudgetConfig) -> Self {
        Self {
            config,
            last_pressure: AtomicU8::new(MemoryPressure::Low.to_u8()),
        }
    }

    /// Create a memory budget with a total limit in megabytes
    pub fn with_limit_mb(total_mb: usize) -> Self {
        Self::new(MemoryBudgetConfig::new(total_mb))
    }

    /// Get the total budget in bytes
    pub fn total_budget(&self) -> usize {
        self.config.total_budget
    }

    /// Get the target bytes after eviction
    pub fn target_bytes(&self) -> usize {
        self.config.target_bytes()
    }

    /// Get the configuration
    pub fn config(&self) -> &MemoryBudgetConfig {
        &self.config
    }

    /// Utilization ratio of a usage figure
    pub fn utilization(&self, usage: usize) -> f64 {
        if self.config.total_budget == 0 {
            if usage == 0 {
                0.0
            } else {
                1.0
            }
        } else {
            usage as f64 / self.config.total_budget as f64
        }
    }

    /// Pressure level of a usage figure
    pub fn pressure(&self, usage: usize) -> MemoryPressure {
        MemoryPressure::from_utilization(self.utilization(usage))
    }

    /// Evaluate a usage figure (normally the pool's total size)
    pub fn evaluate(&self, usage: usize) -> BudgetCheck {
        let pressure = self.pressure(usage);
        let target_bytes = self.config.target_bytes();
        let bytes_to_evict = if usage > self.config.warning_bytes() {
            usage.saturating_sub(target_bytes)
        } else {
            0
        };

        let previous = self.last_pressure.swap(pressure.to_u8(), Ordering::Relaxed);
        if previous != pressure.to_u8() {
            if usage > self.config.critical_bytes() {
                info!(?pressure, usage, budget = self.config.total_budget, "Memory usage critical");
            } else {
                debug!(?pressure, usage, budget = self.config.total_budget, "Memory pressure changed");
            }
        }

        BudgetCheck {
            pressure,
            bytes_to_evict,
            target_bytes,
        }
    }

    /// Check if a usage figure calls for eviction
    pub fn needs_eviction(&self, usage: usize) -> bool {
        usage > self.config.warning_bytes()
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::new(MemoryBudgetConfig::default())
    }
}
