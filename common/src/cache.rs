use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

/// A size-bounded, TTL-expiring cache shared by several processors:
/// `PlanAttributeExtractor`'s regression map, `QueryCorrelator`'s correlation
/// table, and `AdaptiveSampler`'s bucket map all need "LRU eviction on
/// overflow, and also expire after TTL" (original spec §3/§4). One
/// implementation, several call sites -- mirrors the teacher's
/// `structure::queue::QueueImpl` in spirit (a small `Mutex`-guarded structure
/// behind a trait-free struct, safe for concurrent access from the worker
/// pool described in original spec §5).
pub struct TtlLruCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, (V, Instant)>>,
    ttl: Duration,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlLruCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        TtlLruCache { inner: Mutex::new(LruCache::new(capacity)), ttl }
    }

    /// Returns the cached value if present and not expired. A stale entry is
    /// evicted instead of returned; re-entry after eviction is treated as fresh.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.get(key) {
            Some((_, inserted)) => inserted.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            inner.pop(key);
            None
        } else {
            inner.get(key).map(|(v, _)| v.clone())
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap();
        inner.put(key, (value, Instant::now()));
    }

    /// Fetches the current value or computes and inserts a fresh one, all
    /// under one critical section so callers never race themselves into
    /// double-initializing a key.
    pub fn get_or_insert_with(&self, key: K, f: impl FnOnce() -> V) -> V {
        let mut inner = self.inner.lock().unwrap();
        if let Some((v, inserted)) = inner.get(&key) {
            if inserted.elapsed() <= self.ttl {
                return v.clone();
            }
        }
        let value = f();
        inner.put(key, (value.clone(), Instant::now()));
        value
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry older than the configured TTL. Called opportunistically;
    /// `get` also self-heals lazily so this is not required for correctness.
    pub fn evict_expired(&self) {
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<K> = inner
            .iter()
            .filter(|(_, (_, inserted))| inserted.elapsed() > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            inner.pop(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn evicts_by_ttl_and_by_capacity() {
        let cache: TtlLruCache<u32, &'static str> = TtlLruCache::new(2, Duration::from_millis(50));
        cache.insert(1, "a");
        cache.insert(2, "b");
        assert_eq!(cache.get(&1), Some("a"));

        // capacity 2: inserting a third key evicts the least-recently-used (key 2).
        cache.insert(3, "c");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&2), None);

        sleep(Duration::from_millis(80));
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn get_or_insert_with_only_computes_once_while_fresh() {
        let cache: TtlLruCache<&'static str, i32> = TtlLruCache::new(10, Duration::from_secs(10));
        let mut calls = 0;
        let v1 = cache.get_or_insert_with("k", || {
            calls += 1;
            42
        });
        assert_eq!(v1, 42);
        let v2 = cache.get_or_insert_with("k", || {
            calls += 1;
            99
        });
        assert_eq!(v2, 42);
        assert_eq!(calls, 1);
    }
}
