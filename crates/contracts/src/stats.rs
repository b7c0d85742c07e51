//! Buffer pool statistics snapshot

use serde::{Deserialize, Serialize};

/// Counters of the reusable image buffer pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Slots currently allocated
    pub capacity: usize,
    /// Slots handed to the transport and not yet completed
    pub in_flight: usize,
    pub checkouts: u64,
    /// Checkouts served by an existing allocation
    pub reuses: u64,
    /// Checkouts that needed a fresh allocation
    pub allocations: u64,
    /// Reused allocations resized to a new image size
    pub resizes: u64,
    /// Checkouts refused because every slot was in flight
    pub exhausted: u64,
    /// Completions rejected for carrying an outdated handle
    pub stale_completions: u64,
}

impl PoolStats {
    /// Fraction of checkouts served without allocating
    pub fn reuse_ratio(&self) -> f64 {
        if self.checkouts == 0 {
            0.0
        } else {
            self.reuses as f64 / self.checkouts as f64
        }
    }
}
