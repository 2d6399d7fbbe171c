// Query cache (spec §4.8): a per-index mapping `(op, value) -> ResultSet`
// with a per-entry TTL. Sliding mode resets the timer on each read. Any
// mutation clears the cache entirely, and the clear happens before the
// per-index write lock is released (§5 ordering guarantee) so the next
// reader can never observe a stale cache.
//
// Grounded on the teacher's optimization-metrics cache pattern
// (`metrics::optimization::CachedTreeAnalysis`, a value + timestamp + ttl
// triple behind a `parking_lot::RwLock`); here the cache is async-facing
// since it's read under the index's `tokio::sync::RwLock`.

use crate::index::ResultSet;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Cache key: the operator name plus a string representation of its
/// argument(s). Using a string repr (rather than `TypedValue` directly)
/// keeps the key `Hash + Eq` without needing float/array hashing rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub op: String,
    pub arg_repr: String,
}

impl CacheKey {
    pub fn new(op: impl Into<String>, arg_repr: impl Into<String>) -> Self {
        Self { op: op.into(), arg_repr: arg_repr.into() }
    }
}

struct Entry {
    result: ResultSet,
    inserted_at: Instant,
}

/// A bounded, TTL-expiring query cache. Capacity is enforced by evicting
/// the oldest entry when a new one would exceed it (the cache is small
/// and per-index, so this linear scan is cheap relative to a tree read).
pub struct QueryCache {
    ttl: Duration,
    capacity: usize,
    entries: RwLock<HashMap<CacheKey, Entry>>,
}

impl QueryCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self { ttl, capacity, entries: RwLock::new(HashMap::new()) }
    }

    /// Look up a cached result, resetting its TTL on hit (sliding
    /// expiration) and evicting it if already expired.
    pub fn get(&self, key: &CacheKey) -> Option<ResultSet> {
        let mut entries = self.entries.write();
        let expired = match entries.get(key) {
            Some(e) => e.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            entries.remove(key);
            return None;
        }
        let entry = entries.get_mut(key).unwrap();
        entry.inserted_at = Instant::now();
        Some(entry.result.clone())
    }

    pub fn put(&self, key: CacheKey, result: ResultSet) {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, Entry { result, inserted_at: Instant::now() });
    }

    /// Full invalidation on any mutation (spec §4.8, §5).
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexQueryResult;
    use std::thread::sleep;

    fn empty_result() -> ResultSet {
        ResultSet { results: Vec::<IndexQueryResult>::new() }
    }

    #[test]
    fn put_then_get_hits_before_ttl() {
        let cache = QueryCache::new(Duration::from_secs(60), 8);
        let key = CacheKey::new("==", "5");
        cache.put(key.clone(), empty_result());
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn expired_entry_is_evicted_on_read() {
        let cache = QueryCache::new(Duration::from_millis(5), 8);
        let key = CacheKey::new("==", "5");
        cache.put(key.clone(), empty_result());
        sleep(Duration::from_millis(20));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = QueryCache::new(Duration::from_secs(60), 8);
        cache.put(CacheKey::new("==", "1"), empty_result());
        cache.put(CacheKey::new("==", "2"), empty_result());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let cache = QueryCache::new(Duration::from_secs(60), 2);
        cache.put(CacheKey::new("==", "1"), empty_result());
        sleep(Duration::from_millis(2));
        cache.put(CacheKey::new("==", "2"), empty_result());
        sleep(Duration::from_millis(2));
        cache.put(CacheKey::new("==", "3"), empty_result());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&CacheKey::new("==", "1")).is_none());
    }
}
