//! Memoization Engine Module
//!
//! Wraps a function so its results are cached in a storage backend and
//! concurrent misses for the same key share a single computation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CacheError, MemoError, Result};
use crate::key::{callee_identity, CacheKey, KeyBuilder};
use crate::memo::pending::{Outcome, PendingCalls, SettleGuard};
use crate::memo::strategy::{Callee, ExecutionStrategy, StorageHandle};
use crate::memo::MemoStats;
use crate::storage::{AsyncStorage, Params, Storage, TTL_PARAM};

// == Memoize Builder ==
/// Configures how a function gets memoized.
///
/// # Example
/// ```ignore
/// let echo = Memoize::new()
///     .storage(MemoryStorage::new())
///     .ttl(Duration::from_secs(5))
///     .wrap_async(|text: String| async move { Ok::<_, Infallible>(text) })?;
///
/// assert_eq!(echo.call("hi".to_string()).await?, "hi");
/// ```
pub struct Memoize<T> {
    storage: Option<StorageHandle<T>>,
    params: Params,
    name: Option<String>,
    hash_keys: bool,
}

impl<T> Default for Memoize<T> {
    fn default() -> Self {
        Self {
            storage: None,
            params: Params::new(),
            name: None,
            hash_keys: true,
        }
    }
}

impl<T> fmt::Debug for Memoize<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoize")
            .field("async_storage", &self.storage.as_ref().map(StorageHandle::is_async))
            .field("params", &self.params)
            .field("name", &self.name)
            .field("hash_keys", &self.hash_keys)
            .finish()
    }
}

impl<T> Memoize<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder with the TTL from `config`, if one is set.
    pub fn from_config(config: &Config) -> Self {
        let memoize = Self::new();
        match config.ttl {
            Some(seconds) => memoize.ttl(Duration::from_secs(seconds)),
            None => memoize,
        }
    }

    /// Uses a synchronous backend.
    pub fn storage<S>(mut self, storage: S) -> Self
    where
        S: Storage<T> + 'static,
    {
        self.storage = Some(StorageHandle::Sync(Arc::new(storage)));
        self
    }

    /// Uses an asynchronous backend.
    pub fn async_storage<S>(mut self, storage: S) -> Self
    where
        S: AsyncStorage<T> + 'static,
    {
        self.storage = Some(StorageHandle::Async(Arc::new(storage)));
        self
    }

    /// Expire cached results `ttl` after they were written.
    pub fn ttl(self, ttl: Duration) -> Self {
        self.param(TTL_PARAM, ttl.as_secs_f64())
    }

    /// Forwards `name = value` to every `set` on the backend.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Overrides the callee identity used in cache keys.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Stores a SHA-256 digest of the arguments in each key instead of their
    /// canonical text. On by default.
    pub fn hash_keys(mut self, hash_keys: bool) -> Self {
        self.hash_keys = hash_keys;
        self
    }

    // == Wrap ==
    /// Memoizes a synchronous function.
    pub fn wrap<A, E, F>(self, function: F) -> Result<Memoized<A, T, E>>
    where
        A: Serialize + Send + 'static,
        E: Send + Sync + 'static,
        F: Fn(A) -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        let callee: Callee<A, T, E> = Callee::Sync(Arc::new(function));
        let engine = self.build(callee, callee_identity::<F>())?;
        Ok(Memoized {
            engine: Arc::new(engine),
        })
    }

    // == Wrap Async ==
    /// Memoizes an asynchronous function.
    pub fn wrap_async<A, E, F, Fut>(self, function: F) -> Result<AsyncMemoized<A, T, E>>
    where
        A: Serialize + Send + 'static,
        E: Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let name = callee_identity::<F>();
        let callee: Callee<A, T, E> = Callee::Async(Arc::new(move |args: A| function(args).boxed()));
        let engine = self.build(callee, name)?;
        Ok(AsyncMemoized {
            engine: Arc::new(engine),
        })
    }

    fn build<A, E>(self, callee: Callee<A, T, E>, default_name: String) -> Result<Engine<A, T, E>> {
        let storage = self.storage.ok_or_else(|| {
            CacheError::Configuration("no storage backend configured".to_string())
        })?;

        if let Some(name) = self.params.keys().find(|name| !storage.supports_param(name)) {
            return Err(CacheError::Configuration(format!(
                "storage cannot verify parameter `{name}`"
            )));
        }

        let strategy = ExecutionStrategy::select(callee.is_async(), storage.is_async());
        let keys = KeyBuilder::new(self.name.unwrap_or(default_name)).hashed(self.hash_keys);
        info!(callee = keys.callee(), %strategy, params = ?self.params, "memoizing function");

        Ok(Engine {
            keys,
            callee,
            storage,
            params: self.params,
            strategy,
            pending: Arc::new(PendingCalls::new()),
            stats: Arc::new(Mutex::new(MemoStats::new())),
        })
    }
}

// == Engine ==
struct Engine<A, T, E> {
    keys: KeyBuilder,
    callee: Callee<A, T, E>,
    storage: StorageHandle<T>,
    params: Params,
    strategy: ExecutionStrategy,
    pending: Arc<PendingCalls<T, E>>,
    stats: Arc<Mutex<MemoStats>>,
}

impl<A, T, E> Engine<A, T, E> {
    fn describe(&self, f: &mut fmt::Formatter<'_>, surface: &str) -> fmt::Result {
        f.debug_struct(surface)
            .field("callee", &self.keys.callee())
            .field("strategy", &self.strategy)
            .field("hash_keys", &self.keys.is_hashed())
            .field("params", &self.params)
            .field("pending", &self.pending)
            .finish()
    }
}

impl<A, T, E> Engine<A, T, E>
where
    A: Serialize + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    // == Invoke ==
    async fn invoke(&self, args: A) -> Outcome<T, E> {
        let key = self.keys.from_args(&args)?;

        match self.storage.get(&key).await {
            Ok(value) => {
                self.stats.lock().record_hit();
                debug!(%key, "cache hit");
                return Ok(value);
            }
            Err(err) if err.is_not_found() => {
                self.stats.lock().record_miss();
            }
            Err(err) => return Err(err.into()),
        }

        let (flight, started) = self
            .pending
            .join_or_start(&key, || self.compute(key.clone(), args));
        if started {
            debug!(%key, "cache miss, computing");
        } else {
            self.stats.lock().record_coalesced();
            debug!(%key, "cache miss, joining in-flight computation");
        }

        flight.await
    }

    /// Builds the shared computation for `key`.
    ///
    /// Whichever caller drives it to completion performs the single write
    /// back and clears the pending entry.
    fn compute(&self, key: CacheKey, args: A) -> BoxFuture<'static, Outcome<T, E>> {
        let callee = self.callee.clone();
        let storage = self.storage.clone();
        let params = self.params.clone();
        let pending = Arc::clone(&self.pending);
        let stats = Arc::clone(&self.stats);

        async move {
            // Clears the pending entry last, and also if the callee panics.
            let _settle = SettleGuard::new(pending, key.clone());
            stats.lock().record_computation();

            let outcome = match callee.call(args).await {
                Ok(value) => match storage.set(key.clone(), value.clone(), params).await {
                    Ok(()) => Ok(value),
                    Err(err) => {
                        warn!(%key, error = %err, "failed to store computed value");
                        Err(MemoError::Cache(err))
                    }
                },
                Err(err) => {
                    stats.lock().record_failure();
                    debug!(%key, "computation failed, nothing cached");
                    Err(MemoError::Failed(Arc::new(err)))
                }
            };

            outcome
        }
        .boxed()
    }
}

// == Memoized ==
/// A memoized synchronous function.
///
/// `call` drives the shared asynchronous path to completion on the current
/// thread before returning.
pub struct Memoized<A, T, E> {
    engine: Arc<Engine<A, T, E>>,
}

// == Async Memoized ==
/// A memoized asynchronous function.
pub struct AsyncMemoized<A, T, E> {
    engine: Arc<Engine<A, T, E>>,
}

impl<A, T, E> Memoized<A, T, E>
where
    A: Serialize + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn call(&self, args: A) -> Outcome<T, E> {
        futures::executor::block_on(self.engine.invoke(args))
    }
}

impl<A, T, E> AsyncMemoized<A, T, E>
where
    A: Serialize + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub async fn call(&self, args: A) -> Outcome<T, E> {
        self.engine.invoke(args).await
    }
}

macro_rules! memoized_common {
    ($surface:ident) => {
        impl<A, T, E> $surface<A, T, E> {
            /// Identity used to qualify this function's cache keys.
            pub fn callee(&self) -> &str {
                self.engine.keys.callee()
            }

            pub fn strategy(&self) -> ExecutionStrategy {
                self.engine.strategy
            }

            /// Returns a snapshot of this function's counters.
            pub fn stats(&self) -> MemoStats {
                self.engine.stats.lock().clone()
            }

            /// Number of keys with a computation currently in flight.
            pub fn in_flight(&self) -> usize {
                self.engine.pending.len()
            }
        }

        impl<A, T, E> Clone for $surface<A, T, E> {
            fn clone(&self) -> Self {
                Self {
                    engine: Arc::clone(&self.engine),
                }
            }
        }

        impl<A, T, E> fmt::Debug for $surface<A, T, E> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.engine.describe(f, stringify!($surface))
            }
        }
    };
}

memoized_common!(Memoized);
memoized_common!(AsyncMemoized);

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AsyncMemoryStorage, MemoryStorage};
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn double(n: u32) -> std::result::Result<u32, Infallible> {
        Ok(n * 2)
    }

    #[test]
    fn test_wrap_without_storage_fails() {
        let result = Memoize::<u32>::new().wrap(double);
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_wrap_with_unverifiable_param_fails() {
        let result = Memoize::new()
            .storage(MemoryStorage::new())
            .param("owner", "me")
            .wrap(double);
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_strategy_selected_at_wrap_time() {
        let sync_sync = Memoize::new().storage(MemoryStorage::new()).wrap(double).unwrap();
        let sync_async = Memoize::new()
            .async_storage(AsyncMemoryStorage::new())
            .wrap(double)
            .unwrap();
        let async_sync = Memoize::new()
            .storage(MemoryStorage::new())
            .wrap_async(|n: u32| async move { double(n) })
            .unwrap();
        let async_async = Memoize::new()
            .async_storage(AsyncMemoryStorage::new())
            .wrap_async(|n: u32| async move { double(n) })
            .unwrap();

        assert_eq!(sync_sync.strategy(), ExecutionStrategy::SyncCalleeSyncStorage);
        assert_eq!(sync_async.strategy(), ExecutionStrategy::SyncCalleeAsyncStorage);
        assert_eq!(async_sync.strategy(), ExecutionStrategy::AsyncCalleeSyncStorage);
        assert_eq!(async_async.strategy(), ExecutionStrategy::AsyncCalleeAsyncStorage);
    }

    #[test]
    fn test_callee_defaults_to_function_path() {
        let memo = Memoize::new().storage(MemoryStorage::new()).wrap(double).unwrap();
        assert!(memo.callee().ends_with("double"));

        let named = Memoize::new()
            .storage(MemoryStorage::new())
            .name("doubler")
            .wrap(double)
            .unwrap();
        assert_eq!(named.callee(), "doubler");
    }

    #[test]
    fn test_sync_call_caches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let memo = Memoize::new()
            .storage(MemoryStorage::new())
            .wrap(move |n: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                double(n)
            })
            .unwrap();

        assert_eq!(memo.call(2).unwrap(), 4);
        assert_eq!(memo.call(2).unwrap(), 4);
        assert_eq!(memo.call(3).unwrap(), 6);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stats = memo.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.computations, 2);
        assert_eq!(memo.in_flight(), 0);
    }

    #[test]
    fn test_unhashable_arguments_surface_as_errors() {
        let memo = Memoize::new()
            .storage(MemoryStorage::new())
            .wrap(|map: std::collections::HashMap<(u8, u8), u8>| {
                Ok::<_, Infallible>(map.len() as u32)
            })
            .unwrap();

        let mut map = std::collections::HashMap::new();
        map.insert((1, 1), 1);
        let result = memo.call(map);
        assert!(matches!(result, Err(MemoError::Cache(CacheError::InvalidKey(_)))));
    }

    #[test]
    fn test_closure_callees_are_distinct() {
        let a = Memoize::new()
            .storage(MemoryStorage::new())
            .wrap(|n: u32| double(n))
            .unwrap();
        let b = Memoize::new()
            .storage(MemoryStorage::new())
            .wrap(|n: u32| double(n + 1))
            .unwrap();

        assert_ne!(a.callee(), b.callee());
    }

    #[test]
    fn test_hash_keys_toggle() {
        let storage = Arc::new(MemoryStorage::new());
        let hashed = Memoize::new()
            .storage(Arc::clone(&storage))
            .name("doubler")
            .wrap(double)
            .unwrap();
        let verbatim = Memoize::new()
            .storage(Arc::clone(&storage))
            .name("doubler")
            .hash_keys(false)
            .wrap(double)
            .unwrap();

        assert_eq!(hashed.call(21).unwrap(), 42);
        assert_eq!(verbatim.call(21).unwrap(), 42);

        // Same callee and arguments, but the two key forms never alias.
        assert_eq!(storage.len(), 2);
        assert!(storage.contains(&KeyBuilder::new("doubler").from_args(&21).unwrap()));
        assert!(storage.contains(
            &KeyBuilder::new("doubler").hashed(true).from_args(&21).unwrap()
        ));
    }

    #[test]
    fn test_debug_shows_strategy() {
        let memo = Memoize::new()
            .storage(MemoryStorage::new())
            .name("doubler")
            .wrap(double)
            .unwrap();
        let rendered = format!("{memo:?}");
        assert!(rendered.contains("doubler"));
        assert!(rendered.contains("SyncCalleeSyncStorage"));
    }
}
