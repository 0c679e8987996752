//! Memory Storage Module
//!
//! Reference in-process backends: a synchronous one and an asynchronous
//! wrapper around it.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::storage::{AsyncStorage, Params, Storage, ValueEnvelope, VerifierRegistry};

// == Memory Storage ==
/// HashMap of packed envelopes, verified on every read.
#[derive(Debug)]
pub struct MemoryStorage<V> {
    /// Packed envelopes by key
    entries: Mutex<HashMap<CacheKey, Vec<u8>>>,
    /// Verifiers consulted on get
    verifiers: VerifierRegistry,
    _value: PhantomData<fn() -> V>,
}

impl<V> Default for MemoryStorage<V> {
    fn default() -> Self {
        Self::with_verifiers(VerifierRegistry::with_ttl())
    }
}

impl<V> MemoryStorage<V> {
    // == Constructor ==
    /// Creates an empty backend that understands the `ttl` parameter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty backend with a custom verifier registry.
    pub fn with_verifiers(verifiers: VerifierRegistry) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            verifiers,
            _value: PhantomData,
        }
    }

    pub fn verifiers(&self) -> &VerifierRegistry {
        &self.verifiers
    }

    /// Returns the number of stored envelopes, valid or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns true if an envelope is physically present for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key)
    }
}

impl<V> MemoryStorage<V>
where
    V: Serialize + DeserializeOwned,
{
    // == Purge Invalid ==
    /// Removes every envelope that no longer passes verification.
    ///
    /// Returns the number of entries removed. Undecodable envelopes are
    /// removed too.
    pub fn purge_invalid(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();

        entries.retain(|_, blob| match ValueEnvelope::<V>::unpack(blob) {
            Ok((_, params)) => self.verifiers.check(&params).unwrap_or(false),
            Err(_) => false,
        });

        before - entries.len()
    }
}

impl<V> Storage<V> for MemoryStorage<V>
where
    V: Serialize + DeserializeOwned,
{
    fn get(&self, key: &CacheKey) -> Result<V> {
        let blob = self
            .entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;

        let (value, params) = ValueEnvelope::<V>::unpack(&blob)?;
        if self.verifiers.check(&params)? {
            Ok(value)
        } else {
            debug!(%key, "stored entry failed verification");
            Err(CacheError::NotFound(key.to_string()))
        }
    }

    fn set(&self, key: CacheKey, value: V, params: Params) -> Result<()> {
        let stored = self.verifiers.prepare(params)?;
        let blob = ValueEnvelope::pack(&value, &stored)?;
        self.entries.lock().insert(key, blob);
        Ok(())
    }

    fn remove(&self, keys: &[CacheKey]) -> Result<()> {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    fn supports_param(&self, name: &str) -> bool {
        self.verifiers.contains(name)
    }
}

// == Async Memory Storage ==
/// Asynchronous view over a [`MemoryStorage`].
///
/// Every operation yields to the scheduler once before touching the map.
#[derive(Debug)]
pub struct AsyncMemoryStorage<V> {
    inner: Arc<MemoryStorage<V>>,
}

impl<V> Default for AsyncMemoryStorage<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> AsyncMemoryStorage<V> {
    pub fn new() -> Self {
        Self::from_shared(Arc::new(MemoryStorage::new()))
    }

    /// Wraps an existing backend, sharing its entries.
    pub fn from_shared(inner: Arc<MemoryStorage<V>>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<MemoryStorage<V>> {
        &self.inner
    }
}

impl<V> AsyncStorage<V> for AsyncMemoryStorage<V>
where
    V: Serialize + DeserializeOwned + Send + 'static,
{
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<V>> {
        async move {
            tokio::task::yield_now().await;
            self.inner.get(key)
        }
        .boxed()
    }

    fn set(&self, key: CacheKey, value: V, params: Params) -> BoxFuture<'_, Result<()>> {
        async move {
            tokio::task::yield_now().await;
            self.inner.set(key, value, params)
        }
        .boxed()
    }

    fn remove<'a>(&'a self, keys: &'a [CacheKey]) -> BoxFuture<'a, Result<()>> {
        async move {
            tokio::task::yield_now().await;
            self.inner.remove(keys)
        }
        .boxed()
    }

    fn supports_param(&self, name: &str) -> bool {
        Storage::<V>::supports_param(self.inner.as_ref(), name)
    }
}
