//! Time-bounded LRU memoization for read-only tool results.
//!
//! The listing and search handlers memoize whole results keyed by their
//! parameter tuple. Entries expire after a fixed TTL and the least
//! recently used entry is evicted once the cache is full.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

struct Entry {
    value: Value,
    stored_at: Instant,
}

pub struct ResultCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<String, Entry>,
    // Most recently used key at the back.
    order: Vec<String>,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.stored_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }
        inner.order.retain(|k| k != key);
        inner.order.push(key.to_string());
        inner.entries.get(key).map(|e| e.value.clone())
    }

    pub fn put(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            if let Some(oldest) = inner.order.first().cloned() {
                inner.entries.remove(&oldest);
                inner.order.remove(0);
            }
        }
        inner.order.retain(|k| k != key);
        inner.order.push(key.to_string());
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_and_miss() {
        let cache = ResultCache::new(4, Duration::from_secs(60));
        assert!(cache.get("a").is_none());
        cache.put("a", json!(1));
        assert_eq!(cache.get("a"), Some(json!(1)));
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = ResultCache::new(4, Duration::from_millis(0));
        cache.put("a", json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.put("a", json!(1));
        cache.put("b", json!(2));
        // Touch "a" so "b" becomes the LRU entry.
        cache.get("a");
        cache.put("c", json!(3));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn overwriting_does_not_evict() {
        let cache = ResultCache::new(2, Duration::from_secs(60));
        cache.put("a", json!(1));
        cache.put("b", json!(2));
        cache.put("a", json!(3));
        assert_eq!(cache.get("a"), Some(json!(3)));
        assert!(cache.get("b").is_some());
    }
}
