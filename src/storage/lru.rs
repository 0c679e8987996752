//! LRU Overlay Module
//!
//! Bounded, recency-based eviction on top of any backend.
//!
//! Recency is tracked in a ring of nodes stored in an arena. Slot 0 is the
//! sentinel: its `next` is the most recently used key and its `prev` the
//! least recently used one.
//!
//! A `set` for a new key claims its slot, evicting if needed, before the
//! inner write starts. Until that write lands the key is reserved and reads
//! as `NotFound`.

use std::collections::{HashMap, HashSet};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::storage::{AsyncStorage, Params, Storage};

const SENTINEL: usize = 0;

// == LRU Node ==
#[derive(Debug)]
struct Node {
    /// None for the sentinel and for free slots
    key: Option<CacheKey>,
    prev: usize,
    next: usize,
}

impl Node {
    fn detached(slot: usize, key: Option<CacheKey>) -> Self {
        Self {
            key,
            prev: slot,
            next: slot,
        }
    }
}

// == LRU Index ==
/// Node arena plus the key registry that is authoritative for membership.
#[derive(Debug)]
struct LruIndex {
    nodes: Vec<Node>,
    slots: HashMap<CacheKey, usize>,
    /// Admitted keys whose inner write has not landed yet
    reserved: HashSet<CacheKey>,
    free: Vec<usize>,
    evictions: u64,
}

impl LruIndex {
    fn new() -> Self {
        Self {
            nodes: vec![Node::detached(SENTINEL, None)],
            slots: HashMap::new(),
            reserved: HashSet::new(),
            free: Vec::new(),
            evictions: 0,
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[slot].prev = slot;
        self.nodes[slot].next = slot;
    }

    fn link_front(&mut self, slot: usize) {
        let first = self.nodes[SENTINEL].next;
        self.nodes[slot].prev = SENTINEL;
        self.nodes[slot].next = first;
        self.nodes[first].prev = slot;
        self.nodes[SENTINEL].next = slot;
    }

    // == Touch ==
    /// Marks `key` as most recently used, registering it if new.
    fn touch(&mut self, key: CacheKey) {
        if let Some(&slot) = self.slots.get(&key) {
            self.unlink(slot);
            self.link_front(slot);
            return;
        }

        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Node::detached(slot, Some(key.clone()));
                slot
            }
            None => {
                let slot = self.nodes.len();
                self.nodes.push(Node::detached(slot, Some(key.clone())));
                slot
            }
        };
        self.slots.insert(key, slot);
        self.link_front(slot);
    }

    /// Unlinks `key` from the ring but keeps it registered.
    fn detach(&mut self, key: &CacheKey) -> bool {
        match self.slots.get(key) {
            Some(&slot) => {
                self.unlink(slot);
                true
            }
            None => false,
        }
    }

    /// Relinks `key` as most recently used if it is still registered.
    fn reattach(&mut self, key: &CacheKey) {
        if let Some(&slot) = self.slots.get(key) {
            self.unlink(slot);
            self.link_front(slot);
        }
    }

    /// Unregisters `key` and frees its slot.
    fn forget(&mut self, key: &CacheKey) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                self.unlink(slot);
                self.nodes[slot].key = None;
                self.free.push(slot);
                true
            }
            None => false,
        }
    }

    /// Unregisters and returns the least recently used linked key.
    fn pop_oldest(&mut self) -> Option<CacheKey> {
        let slot = self.nodes[SENTINEL].prev;
        if slot == SENTINEL {
            return None;
        }
        let key = self.nodes[slot].key.clone()?;
        self.forget(&key);
        self.evictions += 1;
        Some(key)
    }

    /// Keys from most to least recently used.
    fn order(&self) -> Vec<CacheKey> {
        let mut keys = Vec::with_capacity(self.len());
        let mut slot = self.nodes[SENTINEL].next;
        while slot != SENTINEL {
            if let Some(key) = &self.nodes[slot].key {
                keys.push(key.clone());
            }
            slot = self.nodes[slot].next;
        }
        keys
    }
}

/// Outcome of [`LruStorage::admit`].
#[derive(Debug)]
struct Admission {
    victim: Option<CacheKey>,
    /// True when the key was new and now holds a reservation
    reserved: bool,
}

// == LRU Storage ==
/// Wraps a backend and keeps at most `maxsize` keys resident.
///
/// The overlay's index decides membership: a key that is no longer indexed
/// reads as `NotFound` even if the inner backend still holds it.
#[derive(Debug)]
pub struct LruStorage<S> {
    inner: S,
    index: Mutex<LruIndex>,
    maxsize: usize,
}

impl<S> LruStorage<S> {
    // == Constructor ==
    /// Wraps `inner`, keeping at most `maxsize` keys.
    pub fn new(inner: S, maxsize: usize) -> Result<Self> {
        if maxsize == 0 {
            return Err(CacheError::Configuration(
                "LRU maxsize must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            inner,
            index: Mutex::new(LruIndex::new()),
            maxsize,
        })
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    /// Returns the number of indexed keys.
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.lock().slots.contains_key(key)
    }

    /// Returns how many keys were evicted so far.
    pub fn evictions(&self) -> u64 {
        self.index.lock().evictions
    }

    /// Returns indexed keys from most to least recently used.
    pub fn recency(&self) -> Vec<CacheKey> {
        self.index.lock().order()
    }

    fn begin_get(&self, key: &CacheKey) -> Result<()> {
        let mut index = self.index.lock();
        if !index.reserved.contains(key) && index.detach(key) {
            Ok(())
        } else {
            Err(CacheError::NotFound(key.to_string()))
        }
    }

    /// Settles a read. Returns true when the inner copy should be dropped.
    fn finish_get<V>(&self, key: &CacheKey, outcome: &Result<V>) -> bool {
        let mut index = self.index.lock();
        match outcome {
            Err(err) if err.is_not_found() => {
                index.forget(key);
                true
            }
            _ => {
                index.reattach(key);
                false
            }
        }
    }

    // == Admit ==
    /// Claims a slot for `key` ahead of the inner write.
    ///
    /// A resident key needs nothing. A new key evicts the least recently used
    /// one when the index is full, then is registered as reserved, all under
    /// one lock so concurrent writers never overshoot `maxsize`.
    fn admit(&self, key: &CacheKey) -> Admission {
        let mut index = self.index.lock();
        if index.slots.contains_key(key) {
            return Admission {
                victim: None,
                reserved: false,
            };
        }

        let victim = if index.len() >= self.maxsize {
            index.pop_oldest()
        } else {
            None
        };
        if let Some(victim) = &victim {
            debug!(%victim, maxsize = self.maxsize, "evicting least recently used key");
        }

        index.touch(key.clone());
        index.reserved.insert(key.clone());
        Admission {
            victim,
            reserved: true,
        }
    }

    /// Publishes `key` after its inner write.
    ///
    /// Returns false when the key was evicted or removed while the write was
    /// in flight; the inner copy is then stale.
    fn commit(&self, key: &CacheKey, admission: &Admission) -> bool {
        let mut index = self.index.lock();
        if admission.reserved {
            index.reserved.remove(key);
        }
        if index.slots.contains_key(key) {
            index.reattach(key);
            true
        } else {
            false
        }
    }

    /// Releases a reservation whose write failed.
    fn abandon(&self, key: &CacheKey, admission: &Admission) {
        if admission.reserved {
            let mut index = self.index.lock();
            index.reserved.remove(key);
            index.forget(key);
        }
    }

    fn forget_all(&self, keys: &[CacheKey]) {
        let mut index = self.index.lock();
        for key in keys {
            index.forget(key);
        }
    }
}

impl<V, S> Storage<V> for LruStorage<S>
where
    S: Storage<V>,
{
    fn get(&self, key: &CacheKey) -> Result<V> {
        self.begin_get(key)?;
        let outcome = self.inner.get(key);
        if self.finish_get(key, &outcome) {
            // Best effort: the entry is already unusable.
            let _ = self.inner.remove(std::slice::from_ref(key));
        }
        outcome
    }

    fn set(&self, key: CacheKey, value: V, params: Params) -> Result<()> {
        let admission = self.admit(&key);
        let written = match &admission.victim {
            Some(victim) => self.inner.remove(std::slice::from_ref(victim)),
            None => Ok(()),
        }
        .and_then(|()| self.inner.set(key.clone(), value, params));

        if let Err(err) = written {
            self.abandon(&key, &admission);
            return Err(err);
        }
        if !self.commit(&key, &admission) {
            let _ = self.inner.remove(std::slice::from_ref(&key));
        }
        Ok(())
    }

    fn remove(&self, keys: &[CacheKey]) -> Result<()> {
        self.forget_all(keys);
        self.inner.remove(keys)
    }

    fn supports_param(&self, name: &str) -> bool {
        self.inner.supports_param(name)
    }
}

impl<V, S> AsyncStorage<V> for LruStorage<S>
where
    S: AsyncStorage<V>,
    V: Send + 'static,
{
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<V>> {
        async move {
            self.begin_get(key)?;
            let outcome = self.inner.get(key).await;
            if self.finish_get(key, &outcome) {
                let _ = self.inner.remove(std::slice::from_ref(key)).await;
            }
            outcome
        }
        .boxed()
    }

    fn set(&self, key: CacheKey, value: V, params: Params) -> BoxFuture<'_, Result<()>> {
        async move {
            let admission = self.admit(&key);
            let mut written = Ok(());
            if let Some(victim) = &admission.victim {
                written = self.inner.remove(std::slice::from_ref(victim)).await;
            }
            if written.is_ok() {
                written = self.inner.set(key.clone(), value, params).await;
            }

            if let Err(err) = written {
                self.abandon(&key, &admission);
                return Err(err);
            }
            if !self.commit(&key, &admission) {
                let _ = self.inner.remove(std::slice::from_ref(&key)).await;
            }
            Ok(())
        }
        .boxed()
    }

    fn remove<'a>(&'a self, keys: &'a [CacheKey]) -> BoxFuture<'a, Result<()>> {
        async move {
            self.forget_all(keys);
            self.inner.remove(keys).await
        }
        .boxed()
    }

    fn supports_param(&self, name: &str) -> bool {
        self.inner.supports_param(name)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyBuilder;
    use crate::storage::{AsyncMemoryStorage, MemoryStorage};
    use serde_json::json;
    use std::sync::Arc;
    use std::thread::sleep;
    use std::time::Duration;

    fn key(name: &str) -> CacheKey {
        KeyBuilder::new("lru").from_args(&name).unwrap()
    }

    fn lru(maxsize: usize) -> LruStorage<Arc<MemoryStorage<u32>>> {
        LruStorage::new(Arc::new(MemoryStorage::new()), maxsize).unwrap()
    }

    fn fill(storage: &LruStorage<Arc<MemoryStorage<u32>>>, names: &[&str]) {
        for (n, name) in names.iter().enumerate() {
            storage.set(key(name), n as u32, Params::new()).unwrap();
        }
    }

    #[test]
    fn test_zero_maxsize_rejected() {
        let result = LruStorage::new(MemoryStorage::<u32>::new(), 0);
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_evicts_least_recently_inserted() {
        let storage = lru(4);
        fill(&storage, &["A", "B", "C", "D", "E"]);

        assert_eq!(storage.len(), 4);
        assert_eq!(storage.evictions(), 1);
        assert!(!storage.contains(&key("A")));
        assert!(!storage.inner().contains(&key("A")));
        assert!(matches!(storage.get(&key("A")), Err(CacheError::NotFound(_))));
        assert_eq!(storage.get(&key("E")).unwrap(), 4);
    }

    #[test]
    fn test_access_protects_from_eviction() {
        let storage = lru(4);
        fill(&storage, &["A", "B", "C", "D"]);

        storage.get(&key("A")).unwrap();
        storage.get(&key("B")).unwrap();
        storage.set(key("E"), 4, Params::new()).unwrap();

        assert!(storage.contains(&key("A")));
        assert!(storage.contains(&key("B")));
        assert!(!storage.contains(&key("C")));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let storage = lru(2);
        fill(&storage, &["A", "B"]);

        storage.set(key("A"), 10, Params::new()).unwrap();

        assert_eq!(storage.len(), 2);
        assert_eq!(storage.evictions(), 0);
        assert_eq!(storage.recency(), vec![key("A"), key("B")]);
    }

    #[test]
    fn test_recency_order() {
        let storage = lru(8);
        fill(&storage, &["a", "b", "c"]);

        storage.get(&key("a")).unwrap();
        storage.get(&key("c")).unwrap();
        storage.get(&key("b")).unwrap();

        assert_eq!(storage.recency(), vec![key("b"), key("c"), key("a")]);
    }

    #[test]
    fn test_index_is_authoritative() {
        let storage = lru(4);
        storage.inner().set(key("ghost"), 1, Params::new()).unwrap();

        assert!(matches!(storage.get(&key("ghost")), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_remove_drops_from_index_and_inner() {
        let storage = lru(4);
        fill(&storage, &["A", "B"]);

        storage.remove(&[key("A"), key("missing")]).unwrap();

        assert_eq!(storage.len(), 1);
        assert!(!storage.inner().contains(&key("A")));
        assert!(matches!(storage.get(&key("A")), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_expired_entry_leaves_index() {
        let storage = lru(4);
        let mut params = Params::new();
        params.insert("ttl".to_string(), json!(1));
        storage.set(key("A"), 1, params).unwrap();

        sleep(Duration::from_millis(1100));

        assert!(matches!(storage.get(&key("A")), Err(CacheError::NotFound(_))));
        assert!(storage.is_empty());
        assert!(storage.inner().is_empty());
    }

    #[test]
    fn test_slots_are_reused() {
        let storage = lru(2);
        fill(&storage, &["A", "B", "C", "D", "E", "F"]);

        assert_eq!(storage.index.lock().nodes.len(), 3);
        assert_eq!(storage.recency(), vec![key("F"), key("E")]);
    }

    #[test]
    fn test_forwards_param_support() {
        let storage = lru(2);
        assert!(Storage::<u32>::supports_param(&storage, "ttl"));
        assert!(!Storage::<u32>::supports_param(&storage, "owner"));
    }

    #[test]
    fn test_threaded_writers_never_overshoot() {
        let storage = lru(4);

        std::thread::scope(|scope| {
            for writer in 0..8u32 {
                let storage = &storage;
                scope.spawn(move || {
                    for n in 0..50u32 {
                        let name = format!("{writer}-{n}");
                        storage.set(key(&name), n, Params::new()).unwrap();
                        assert!(storage.len() <= 4);
                    }
                });
            }
        });

        assert_eq!(storage.len(), 4);
        assert_eq!(storage.inner().len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_new_keys_respect_maxsize() {
        let storage = LruStorage::new(AsyncMemoryStorage::<u32>::new(), 2).unwrap();
        storage.set(key("A"), 0, Params::new()).await.unwrap();
        storage.set(key("B"), 1, Params::new()).await.unwrap();

        let (c, d) = tokio::join!(
            storage.set(key("C"), 2, Params::new()),
            storage.set(key("D"), 3, Params::new())
        );
        c.unwrap();
        d.unwrap();

        assert_eq!(storage.len(), 2);
        assert_eq!(storage.evictions(), 2);
        assert_eq!(storage.inner().inner().len(), 2);
        assert_eq!(storage.get(&key("C")).await.unwrap(), 2);
        assert_eq!(storage.get(&key("D")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reserved_key_reads_as_missing() {
        let storage = LruStorage::new(AsyncMemoryStorage::<u32>::new(), 2).unwrap();

        let (written, read) = futures::future::join(
            storage.set(key("A"), 1, Params::new()),
            storage.get(&key("A")),
        )
        .await;

        written.unwrap();
        assert!(matches!(read, Err(CacheError::NotFound(_))));
        assert_eq!(storage.get(&key("A")).await.unwrap(), 1);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_failed_write_releases_reservation() {
        let storage = lru(2);
        let mut params = Params::new();
        params.insert("owner".to_string(), json!("me"));

        let result = storage.set(key("A"), 1, params);

        assert!(matches!(result, Err(CacheError::Verification(_))));
        assert!(storage.is_empty());
        storage.set(key("A"), 1, Params::new()).unwrap();
        assert_eq!(storage.get(&key("A")).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_async_inner_eviction_order() {
        let storage = LruStorage::new(AsyncMemoryStorage::<u32>::new(), 4).unwrap();
        for (n, name) in ["A", "B", "C", "D"].iter().enumerate() {
            storage.set(key(name), n as u32, Params::new()).await.unwrap();
        }

        assert_eq!(storage.get(&key("B")).await.unwrap(), 1);
        storage.set(key("E"), 4, Params::new()).await.unwrap();

        assert!(matches!(storage.get(&key("A")).await, Err(CacheError::NotFound(_))));
        assert_eq!(storage.get(&key("B")).await.unwrap(), 1);
        assert!(storage.contains(&key("C")));
    }
}
