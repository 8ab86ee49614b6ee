use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Concurrent map whose entries expire after a fixed TTL.
///
/// Inserting an existing key overwrites it, so repeated writes of the same
/// computation are idempotent.
pub struct TtlCache<K, V> {
    entries: DashMap<K, (V, Instant)>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Live value for `key`; expired entries are evicted on read.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.1 > now {
                return Some(entry.0.clone());
            }
        }
        self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (value, Instant::now() + self.ttl));
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_overwrites() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("AAPL".to_string(), 1);
        cache.insert("AAPL".to_string(), 2);
        assert_eq!(cache.get(&"AAPL".to_string()), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entries_evicted() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert(1u8, "x");
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());

        cache.insert(2u8, "y");
        cache.purge_expired();
        assert!(cache.is_empty());
    }
}
