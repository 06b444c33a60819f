//! In-memory caches
//!
//! Two small caches back the hot paths: a bounded LRU map that memoizes
//! decoded rich-text blobs keyed by message id (the same blob is decoded
//! repeatedly across overlapping queries), and a short-TTL cache for the
//! chat-list result. Both are bounded with explicit eviction so memory
//! stays capped under sustained use.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Bounded least-recently-used cache.
///
/// Recency is tracked with a monotonic tick per access; when the cache is
/// full, the entry with the smallest tick is evicted. Capacity is fixed at
/// construction and zero capacity disables the cache entirely.
#[derive(Debug)]
pub struct LruCache<K, V> {
    entries: HashMap<K, (V, u64)>,
    capacity: usize,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(4096)),
            capacity,
            tick: 0,
        }
    }

    /// Look up a key, refreshing its recency on hit.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|(value, used)| {
            *used = tick;
            value.clone()
        })
    }

    /// Insert a value, evicting the least-recently-used entry when full.
    pub fn put(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        self.tick += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (value, self.tick));
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Single-slot cache with a wall-clock TTL, keyed by an identity string.
///
/// Used for the chat-list result: the slot is valid only while the key (the
/// prepared-store path) matches and the TTL has not elapsed, and is cleared
/// outright whenever ingestion commits new data.
#[derive(Debug)]
pub struct TtlSlot<T> {
    slot: Option<(String, Instant, T)>,
    ttl: Duration,
}

impl<T: Clone> TtlSlot<T> {
    /// Create an empty slot with the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { slot: None, ttl }
    }

    /// Fetch the cached value if the key matches and the TTL holds.
    pub fn get(&mut self, key: &str) -> Option<T> {
        match &self.slot {
            Some((cached_key, stored_at, value))
                if cached_key == key && stored_at.elapsed() < self.ttl =>
            {
                Some(value.clone())
            }
            _ => {
                self.slot = None;
                None
            }
        }
    }

    /// Store a value under the given identity key.
    pub fn put(&mut self, key: &str, value: T) {
        self.slot = Some((key.to_string(), Instant::now(), value));
    }

    /// Invalidate the slot.
    pub fn clear(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        assert_eq!(cache.get(&1), Some("a")); // refresh 1
        cache.put(3, "c"); // evicts 2
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&3), Some("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn lru_overwrite_does_not_evict() {
        let mut cache = LruCache::new(2);
        cache.put(1, "a");
        cache.put(2, "b");
        cache.put(2, "b2");
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&2), Some("b2"));
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let mut cache = LruCache::new(0);
        cache.put(1, "a");
        assert!(cache.is_empty());
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn ttl_slot_respects_key_and_ttl() {
        let mut slot = TtlSlot::new(Duration::from_secs(30));
        slot.put("/tmp/a.db", 7);
        assert_eq!(slot.get("/tmp/a.db"), Some(7));
        // A different identity invalidates the slot.
        assert_eq!(slot.get("/tmp/b.db"), None);
        assert_eq!(slot.get("/tmp/a.db"), None);
    }

    #[test]
    fn ttl_slot_expires() {
        let mut slot = TtlSlot::new(Duration::from_millis(0));
        slot.put("k", 1);
        assert_eq!(slot.get("k"), None);
    }
}
