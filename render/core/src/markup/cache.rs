//! Bounded markup cache with first-in-first-out eviction
//!
//! The markup service keeps two of these (full renders and partial renders).
//! Eviction removes the oldest-inserted entry once the bound is exceeded.
//! Lookups never change eviction order, so a hot key still ages out; that
//! keeps the structure a plain queue and is cheap enough for per-chunk use.
//!
//! # Invariants
//!
//! - `len() <= capacity()` after every operation
//! - Re-inserting an existing key replaces the value but keeps its position

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Default number of entries per cache
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Hit/miss counters for one cache
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Entries removed by the bound
    pub evictions: u64,
    /// Current entry count
    pub entries: usize,
}

impl CacheStats {
    /// Hit ratio in `0.0..=1.0` (0 when there were no lookups)
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// FIFO-bounded map
#[derive(Debug)]
pub struct FifoCache<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V: Clone> FifoCache<K, V> {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            stats: CacheStats::default(),
        }
    }

    /// Look up a value; does not affect eviction order
    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.entries.get(key) {
            Some(value) => {
                self.stats.hits += 1;
                Some(value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Whether `key` is cached (not counted as a lookup)
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a value, evicting the oldest entries past the bound
    ///
    /// Returns the evicted keys, oldest first.
    pub fn insert(&mut self, key: K, value: V) -> Vec<K> {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return Vec::new();
        }

        self.order.push_back(key.clone());
        self.entries.insert(key, value);

        let mut evicted = Vec::new();
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                self.stats.evictions += 1;
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// Drop every entry (counters other than `entries` are kept)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Current entry count
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum entry count
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_plus_one_evicts_first_inserted() {
        let mut cache = FifoCache::new(3);
        assert!(cache.insert("a", 1).is_empty());
        assert!(cache.insert("b", 2).is_empty());
        assert!(cache.insert("c", 3).is_empty());

        let evicted = cache.insert("d", 4);
        assert_eq!(evicted, vec!["a"]);
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&"a"));
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"d"));
    }

    #[test]
    fn test_lookup_does_not_promote() {
        let mut cache = FifoCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);

        // Touch "a" repeatedly; it is still the oldest insertion.
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"a"), Some(1));

        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, vec!["a"]);
    }

    #[test]
    fn test_reinsert_replaces_in_place() {
        let mut cache = FifoCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert!(cache.insert("a", 10).is_empty());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a"), Some(10));

        assert_eq!(cache.insert("c", 3), vec!["a"]);
    }

    #[test]
    fn test_never_exceeds_bound() {
        let mut cache = FifoCache::new(5);
        for i in 0..50 {
            cache.insert(i, i * 2);
            assert!(cache.len() <= cache.capacity());
        }
        assert_eq!(cache.stats().evictions, 45);
    }

    #[test]
    fn test_stats_and_clear() {
        let mut cache = FifoCache::new(4);
        cache.insert("k", 1);
        let _ = cache.get(&"k");
        let _ = cache.get(&"missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = FifoCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.insert(1, "one");
        cache.insert(2, "two");
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&2));
    }
}
