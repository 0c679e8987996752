//! Dogpile - memoization with cache stampede protection
//!
//! Wraps sync or async functions so their results are cached in a pluggable
//! storage backend, re-validated by named verifiers such as TTL, optionally
//! bounded by an LRU overlay, and never recomputed twice concurrently for the
//! same arguments.

pub mod config;
pub mod error;
pub mod key;
pub mod memo;
pub mod storage;
pub mod tasks;

pub use config::Config;
pub use error::{CacheError, MemoError};
pub use key::{CacheKey, KeyBuilder};
pub use memo::{AsyncMemoized, ExecutionStrategy, MemoStats, Memoize, Memoized};
pub use storage::{AsyncMemoryStorage, AsyncStorage, LruStorage, MemoryStorage, Storage};
pub use tasks::spawn_purge_task;
