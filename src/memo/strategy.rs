//! Execution Strategy Module
//!
//! Lifts synchronous callees and backends to the asynchronous call shape so
//! one code path serves every combination.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::key::CacheKey;
use crate::storage::{AsyncStorage, Params, Storage};

// == Execution Strategy ==
/// Which of the four callee/storage combinations an engine runs.
///
/// Selected once when a function is wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStrategy {
    SyncCalleeSyncStorage,
    SyncCalleeAsyncStorage,
    AsyncCalleeSyncStorage,
    AsyncCalleeAsyncStorage,
}

impl ExecutionStrategy {
    pub fn select(async_callee: bool, async_storage: bool) -> Self {
        match (async_callee, async_storage) {
            (false, false) => ExecutionStrategy::SyncCalleeSyncStorage,
            (false, true) => ExecutionStrategy::SyncCalleeAsyncStorage,
            (true, false) => ExecutionStrategy::AsyncCalleeSyncStorage,
            (true, true) => ExecutionStrategy::AsyncCalleeAsyncStorage,
        }
    }

    pub fn async_callee(self) -> bool {
        matches!(
            self,
            ExecutionStrategy::AsyncCalleeSyncStorage | ExecutionStrategy::AsyncCalleeAsyncStorage
        )
    }

    pub fn async_storage(self) -> bool {
        matches!(
            self,
            ExecutionStrategy::SyncCalleeAsyncStorage | ExecutionStrategy::AsyncCalleeAsyncStorage
        )
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStrategy::SyncCalleeSyncStorage => "sync callee / sync storage",
            ExecutionStrategy::SyncCalleeAsyncStorage => "sync callee / async storage",
            ExecutionStrategy::AsyncCalleeSyncStorage => "async callee / sync storage",
            ExecutionStrategy::AsyncCalleeAsyncStorage => "async callee / async storage",
        };
        f.write_str(name)
    }
}

// == Callee ==
type SyncFn<A, T, E> = dyn Fn(A) -> std::result::Result<T, E> + Send + Sync;
type AsyncFn<A, T, E> = dyn Fn(A) -> BoxFuture<'static, std::result::Result<T, E>> + Send + Sync;

/// The wrapped function, in either calling convention.
pub(crate) enum Callee<A, T, E> {
    Sync(Arc<SyncFn<A, T, E>>),
    Async(Arc<AsyncFn<A, T, E>>),
}

impl<A, T, E> Clone for Callee<A, T, E> {
    fn clone(&self) -> Self {
        match self {
            Callee::Sync(function) => Callee::Sync(Arc::clone(function)),
            Callee::Async(function) => Callee::Async(Arc::clone(function)),
        }
    }
}

impl<A, T, E> Callee<A, T, E> {
    pub(crate) fn is_async(&self) -> bool {
        matches!(self, Callee::Async(_))
    }

    /// Runs the function; a synchronous one completes without suspending.
    pub(crate) async fn call(&self, args: A) -> std::result::Result<T, E> {
        match self {
            Callee::Sync(function) => function(args),
            Callee::Async(function) => function(args).await,
        }
    }
}

// == Storage Handle ==
/// The configured backend, in either calling convention.
pub(crate) enum StorageHandle<V> {
    Sync(Arc<dyn Storage<V>>),
    Async(Arc<dyn AsyncStorage<V>>),
}

impl<V> Clone for StorageHandle<V> {
    fn clone(&self) -> Self {
        match self {
            StorageHandle::Sync(storage) => StorageHandle::Sync(Arc::clone(storage)),
            StorageHandle::Async(storage) => StorageHandle::Async(Arc::clone(storage)),
        }
    }
}

impl<V> StorageHandle<V> {
    pub(crate) fn is_async(&self) -> bool {
        matches!(self, StorageHandle::Async(_))
    }

    pub(crate) fn supports_param(&self, name: &str) -> bool {
        match self {
            StorageHandle::Sync(storage) => storage.supports_param(name),
            StorageHandle::Async(storage) => storage.supports_param(name),
        }
    }

    pub(crate) async fn get(&self, key: &CacheKey) -> Result<V> {
        match self {
            StorageHandle::Sync(storage) => storage.get(key),
            StorageHandle::Async(storage) => storage.get(key).await,
        }
    }

    pub(crate) async fn set(&self, key: CacheKey, value: V, params: Params) -> Result<()> {
        match self {
            StorageHandle::Sync(storage) => storage.set(key, value, params),
            StorageHandle::Async(storage) => storage.set(key, value, params).await,
        }
    }
}
