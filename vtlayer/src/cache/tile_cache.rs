//! Tile-keyed LRU over [`lru::LruCache`].
//!
//! The wrapper adds what the store needs on top of the crate: hit, miss and
//! eviction counters, a zero capacity that holds nothing, and capacity
//! changes that report which keys fell out.

use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::debug;

use super::{CacheError, CacheStats};
use crate::coord::TileKey;

/// Fixed-capacity LRU map from [`TileKey`] to `V`.
///
/// `get` and `put` are the only operations that promote an entry. Over
/// capacity, exactly one entry is evicted from the tail per insert.
#[derive(Debug)]
pub struct TileCache<V> {
    /// `None` while the capacity is zero.
    inner: Option<LruCache<TileKey, V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> TileCache<V> {
    /// Create an empty cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(LruCache::new),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up an entry, promoting it to most-recently used on a hit.
    pub fn get(&mut self, key: &TileKey) -> Option<&V> {
        match self.inner.as_mut().and_then(|inner| inner.get(key)) {
            Some(value) => {
                self.hits += 1;
                debug!(tile = %key, "cache hit");
                Some(value)
            }
            None => {
                self.misses += 1;
                debug!(tile = %key, "cache miss");
                None
            }
        }
    }

    /// Look up an entry without promoting it or touching the statistics.
    pub fn peek(&self, key: &TileKey) -> Option<&V> {
        self.inner.as_ref()?.peek(key)
    }

    /// Insert or replace an entry and promote it to the head.
    ///
    /// Returns the entry evicted from the tail, if the insert pushed the
    /// cache over capacity. At zero capacity the new entry itself is
    /// returned.
    pub fn put(&mut self, key: TileKey, value: V) -> Option<(TileKey, V)> {
        let Some(inner) = self.inner.as_mut() else {
            self.evictions += 1;
            debug!(tile = %key, "cache evict");
            return Some((key, value));
        };

        match inner.push(key.clone(), value) {
            // `push` hands back the old value when the key was already cached.
            Some((old, _)) if old == key => None,
            Some((evicted, value)) => {
                self.evictions += 1;
                debug!(tile = %evicted, "cache evict");
                Some((evicted, value))
            }
            None => None,
        }
    }

    /// Change the capacity, evicting from the tail until the cache fits.
    ///
    /// A negative capacity fails and leaves the cache unchanged. Returns the
    /// evicted keys, least-recently used first.
    pub fn set_capacity(&mut self, capacity: i64) -> Result<Vec<TileKey>, CacheError> {
        let capacity =
            usize::try_from(capacity).map_err(|_| CacheError::InvalidCapacity(capacity))?;

        let mut evicted = Vec::new();
        match NonZeroUsize::new(capacity) {
            None => {
                if let Some(mut inner) = self.inner.take() {
                    while let Some((key, _)) = inner.pop_lru() {
                        self.evictions += 1;
                        debug!(tile = %key, "cache evict");
                        evicted.push(key);
                    }
                }
            }
            Some(cap) => match self.inner.as_mut() {
                Some(inner) => {
                    while inner.len() > capacity {
                        let Some((key, _)) = inner.pop_lru() else {
                            break;
                        };
                        self.evictions += 1;
                        debug!(tile = %key, "cache evict");
                        evicted.push(key);
                    }
                    inner.resize(cap);
                }
                None => self.inner = Some(LruCache::new(cap)),
            },
        }
        Ok(evicted)
    }

    /// Drop an entry without counting it as an eviction.
    pub fn remove(&mut self, key: &TileKey) -> Option<V> {
        self.inner.as_mut()?.pop(key)
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.contains(key))
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.cap().get())
    }

    /// Keys from most- to least-recently used.
    pub fn keys(&self) -> Vec<TileKey> {
        self.inner
            .as_ref()
            .map(|inner| inner.iter().map(|(key, _)| key.clone()).collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            entry_count: self.len(),
            capacity: self.capacity(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileCoord;
    use proptest::prelude::*;

    fn key(x: u32) -> TileKey {
        TileCoord::new(x, 0, 10).unwrap().key()
    }

    fn sorted_keys(cache: &TileCache<&'static str>) -> Vec<TileKey> {
        let mut keys = cache.keys();
        keys.sort();
        keys
    }

    #[test]
    fn test_eviction_order() {
        let mut cache = TileCache::new(2);
        cache.put(key(1), "A");
        cache.put(key(2), "B");
        let evicted = cache.put(key(3), "C");

        assert_eq!(evicted, Some((key(1), "A")));
        assert_eq!(sorted_keys(&cache), vec![key(2), key(3)]);
        assert!(!cache.contains(&key(1)));
    }

    #[test]
    fn test_get_promotes() {
        let mut cache = TileCache::new(2);
        cache.put(key(1), "A");
        cache.put(key(2), "B");
        assert_eq!(cache.get(&key(1)), Some(&"A"));
        cache.put(key(3), "C");

        assert_eq!(sorted_keys(&cache), vec![key(1), key(3)]);
        assert!(!cache.contains(&key(2)));
    }

    #[test]
    fn test_put_existing_replaces_and_promotes() {
        let mut cache = TileCache::new(2);
        cache.put(key(1), "A");
        cache.put(key(2), "B");
        assert!(cache.put(key(1), "A2").is_none());

        assert_eq!(cache.keys(), vec![key(1), key(2)]);
        assert_eq!(cache.peek(&key(1)), Some(&"A2"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_peek_does_not_promote() {
        let mut cache = TileCache::new(2);
        cache.put(key(1), "A");
        cache.put(key(2), "B");
        cache.peek(&key(1));
        cache.put(key(3), "C");

        assert!(!cache.contains(&key(1)));
    }

    #[test]
    fn test_zero_capacity_holds_nothing() {
        let mut cache = TileCache::new(0);
        let evicted = cache.put(key(1), "A");

        assert_eq!(evicted, Some((key(1), "A")));
        assert!(cache.is_empty());
        assert!(cache.get(&key(1)).is_none());
    }

    #[test]
    fn test_set_capacity_shrinks_from_tail() {
        let mut cache = TileCache::new(4);
        for i in 1..=4 {
            cache.put(key(i), "v");
        }

        let evicted = cache.set_capacity(2).unwrap();

        assert_eq!(evicted, vec![key(1), key(2)]);
        assert_eq!(cache.keys(), vec![key(4), key(3)]);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_set_capacity_grow_never_evicts() {
        let mut cache = TileCache::new(2);
        cache.put(key(1), "A");
        cache.put(key(2), "B");

        assert!(cache.set_capacity(10).unwrap().is_empty());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.capacity(), 10);
    }

    #[test]
    fn test_negative_capacity_leaves_cache_unchanged() {
        let mut cache = TileCache::new(2);
        cache.put(key(1), "A");

        let result = cache.set_capacity(-1);

        assert_eq!(result, Err(CacheError::InvalidCapacity(-1)));
        assert_eq!(cache.capacity(), 2);
        assert_eq!(cache.keys(), vec![key(1)]);
    }

    #[test]
    fn test_shrink_to_zero_then_grow() {
        let mut cache = TileCache::new(2);
        cache.put(key(1), "A");
        cache.put(key(2), "B");

        assert_eq!(cache.set_capacity(0).unwrap(), vec![key(1), key(2)]);
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 0);

        assert!(cache.set_capacity(3).unwrap().is_empty());
        cache.put(key(3), "C");
        assert_eq!(cache.keys(), vec![key(3)]);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_remove_is_not_an_eviction() {
        let mut cache = TileCache::new(3);
        cache.put(key(1), "A");
        cache.put(key(2), "B");
        cache.put(key(3), "C");

        assert_eq!(cache.remove(&key(1)), Some("A"));
        assert_eq!(cache.keys(), vec![key(3), key(2)]);
        assert_eq!(cache.stats().evictions, 0);
        assert!(cache.remove(&key(1)).is_none());
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let mut cache = TileCache::new(2);
        cache.put(key(1), "A");
        cache.get(&key(1));
        cache.get(&key(2));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u32, u32),
        Get(u32),
        Remove(u32),
        SetCapacity(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..8, any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
            (0u32..8).prop_map(Op::Get),
            (0u32..8).prop_map(Op::Remove),
            (-2i64..6).prop_map(Op::SetCapacity),
        ]
    }

    proptest! {
        /// The cache matches a vector-backed reference model and never
        /// exceeds its capacity.
        #[test]
        fn prop_matches_reference_model(capacity in 0usize..5, ops in prop::collection::vec(op(), 0..64)) {
            let mut cache = TileCache::new(capacity);
            let mut model: Vec<(TileKey, u32)> = Vec::new();
            let mut model_capacity = capacity;

            for op in ops {
                match op {
                    Op::Put(k, v) => {
                        let k = key(k);
                        model.retain(|(mk, _)| mk != &k);
                        model.insert(0, (k.clone(), v));
                        if model.len() > model_capacity {
                            model.pop();
                        }
                        cache.put(k, v);
                    }
                    Op::Get(k) => {
                        let k = key(k);
                        let expected = model.iter().position(|(mk, _)| mk == &k).map(|pos| {
                            let entry = model.remove(pos);
                            let value = entry.1;
                            model.insert(0, entry);
                            value
                        });
                        prop_assert_eq!(cache.get(&k).copied(), expected);
                    }
                    Op::Remove(k) => {
                        let k = key(k);
                        let expected = model.iter().position(|(mk, _)| mk == &k).map(|pos| model.remove(pos).1);
                        prop_assert_eq!(cache.remove(&k), expected);
                    }
                    Op::SetCapacity(n) => {
                        let result = cache.set_capacity(n);
                        if n < 0 {
                            prop_assert!(result.is_err());
                        } else {
                            model_capacity = n as usize;
                            model.truncate(model_capacity);
                        }
                    }
                }

                prop_assert!(cache.len() <= cache.capacity());
                let expected_keys: Vec<TileKey> = model.iter().map(|(k, _)| k.clone()).collect();
                prop_assert_eq!(cache.keys(), expected_keys);
            }
        }
    }
}
