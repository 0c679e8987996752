//! Pending Calls Module
//!
//! Per-engine registry of in-flight computations, one per key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::MemoError;
use crate::key::CacheKey;

/// Result of one memoized call.
pub(crate) type Outcome<T, E> = std::result::Result<T, MemoError<E>>;

/// A computation every caller for the same key awaits.
pub(crate) type Flight<T, E> = Shared<BoxFuture<'static, Outcome<T, E>>>;

// == Pending Calls ==
pub(crate) struct PendingCalls<T, E> {
    calls: Mutex<HashMap<CacheKey, Flight<T, E>>>,
}

impl<T, E> Default for PendingCalls<T, E> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<T, E> PendingCalls<T, E> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // == Settle ==
    /// Drops the entry for `key` so the next miss starts afresh.
    pub(crate) fn settle(&self, key: &CacheKey) {
        self.calls.lock().remove(key);
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.calls.lock().contains_key(key)
    }
}

impl<T, E> PendingCalls<T, E>
where
    T: Clone,
{
    // == Join Or Start ==
    /// Returns the in-flight computation for `key`, registering the one built
    /// by `start` if there is none.
    ///
    /// The flag is true when this call started the computation.
    pub(crate) fn join_or_start<F>(&self, key: &CacheKey, start: F) -> (Flight<T, E>, bool)
    where
        F: FnOnce() -> BoxFuture<'static, Outcome<T, E>>,
    {
        let mut calls = self.calls.lock();
        if let Some(flight) = calls.get(key) {
            return (flight.clone(), false);
        }

        let flight = start().shared();
        calls.insert(key.clone(), flight.clone());
        (flight, true)
    }
}

// == Settle Guard ==
/// Settles a key when dropped.
///
/// Lives inside the shared computation, so the entry is cleared once the
/// computation finishes, and also when the callee unwinds.
pub(crate) struct SettleGuard<T, E> {
    pending: Arc<PendingCalls<T, E>>,
    key: CacheKey,
}

impl<T, E> SettleGuard<T, E> {
    pub(crate) fn new(pending: Arc<PendingCalls<T, E>>, key: CacheKey) -> Self {
        Self { pending, key }
    }
}

impl<T, E> Drop for SettleGuard<T, E> {
    fn drop(&mut self) {
        self.pending.settle(&self.key);
    }
}

impl<T, E> fmt::Debug for PendingCalls<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCalls")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}
