//! Memo Statistics Module
//!
//! Tracks hits, misses and computations for one memoized function.

use serde::Serialize;

// == Memo Stats ==
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    /// Calls answered from storage
    pub hits: u64,
    /// Calls that missed storage
    pub misses: u64,
    /// Underlying function invocations
    pub computations: u64,
    /// Misses that joined an in-flight computation
    pub coalesced: u64,
    /// Underlying invocations that failed
    pub failures: u64,
}

impl MemoStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if nothing was called yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_computation(&mut self) {
        self.computations += 1;
    }

    pub fn record_coalesced(&mut self) {
        self.coalesced += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }
}
