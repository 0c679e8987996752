//! Storage Module
//!
//! Backend contracts for the memoization engine plus the reference memory
//! backends and the LRU overlay.
//!
//! A backend is either synchronous ([`Storage`]) or asynchronous
//! ([`AsyncStorage`]). Both report an absent or invalid entry as
//! [`CacheError::NotFound`](crate::error::CacheError::NotFound).

mod envelope;
mod lru;
mod memory;
mod verify;


use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::key::CacheKey;

// Re-export public types
pub use envelope::ValueEnvelope;
pub use lru::LruStorage;
pub use memory::{AsyncMemoryStorage, MemoryStorage};
pub use verify::{TtlVerifier, Verifier, VerifierRegistry};

/// Named parameters forwarded to `set` and checked by verifiers on `get`.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Parameter name used for time-to-live verification.
pub const TTL_PARAM: &str = "ttl";

// == Storage ==
/// Synchronous key/value backend.
pub trait Storage<V>: Send + Sync {
    /// Returns the value for `key`, or `NotFound` when absent or no longer valid.
    fn get(&self, key: &CacheKey) -> Result<V>;

    /// Stores `value` under `key`, replacing any previous value and params.
    fn set(&self, key: CacheKey, value: V, params: Params) -> Result<()>;

    /// Removes every key in `keys`; missing keys are ignored.
    fn remove(&self, keys: &[CacheKey]) -> Result<()>;

    /// Whether this backend can verify a parameter called `name`.
    fn supports_param(&self, _name: &str) -> bool {
        true
    }
}

// == Async Storage ==
/// Asynchronous key/value backend.
pub trait AsyncStorage<V>: Send + Sync {
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<V>>;

    fn set(&self, key: CacheKey, value: V, params: Params) -> BoxFuture<'_, Result<()>>;

    fn remove<'a>(&'a self, keys: &'a [CacheKey]) -> BoxFuture<'a, Result<()>>;

    fn supports_param(&self, _name: &str) -> bool {
        true
    }
}

impl<V, S> Storage<V> for Arc<S>
where
    S: Storage<V> + ?Sized,
{
    fn get(&self, key: &CacheKey) -> Result<V> {
        <S as Storage<V>>::get(self, key)
    }

    fn set(&self, key: CacheKey, value: V, params: Params) -> Result<()> {
        <S as Storage<V>>::set(self, key, value, params)
    }

    fn remove(&self, keys: &[CacheKey]) -> Result<()> {
        <S as Storage<V>>::remove(self, keys)
    }

    fn supports_param(&self, name: &str) -> bool {
        <S as Storage<V>>::supports_param(self, name)
    }
}

impl<V, S> AsyncStorage<V> for Arc<S>
where
    S: AsyncStorage<V> + ?Sized,
{
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<V>> {
        <S as AsyncStorage<V>>::get(self, key)
    }

    fn set(&self, key: CacheKey, value: V, params: Params) -> BoxFuture<'_, Result<()>> {
        <S as AsyncStorage<V>>::set(self, key, value, params)
    }

    fn remove<'a>(&'a self, keys: &'a [CacheKey]) -> BoxFuture<'a, Result<()>> {
        <S as AsyncStorage<V>>::remove(self, keys)
    }

    fn supports_param(&self, name: &str) -> bool {
        <S as AsyncStorage<V>>::supports_param(self, name)
    }
}
