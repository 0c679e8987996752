//! Memo Module
//!
//! The memoization runtime: wraps sync or async functions over sync or async
//! storage, caches their results and coalesces concurrent misses.

mod engine;
mod pending;
mod stats;
mod strategy;

// Re-export public types
pub use engine::{AsyncMemoized, Memoize, Memoized};
pub use stats::MemoStats;
pub use strategy::ExecutionStrategy;
