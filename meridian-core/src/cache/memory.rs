//! In-process cache tier.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use super::key::{now_secs, CacheEntry, CacheStats};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// TTL cache held in memory. One lock guards every operation.
#[derive(Debug)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
    default_ttl: u64,
}

impl MemoryCache {
    pub fn new(default_ttl: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    // Poisoning leaves the map intact.
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fetch a live value. Expired entries are removed and count as misses.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            None => {
                inner.stats.record_miss();
                return None;
            }
            Some(entry) => entry.is_expired(),
        };
        if expired {
            inner.entries.remove(key);
            inner.stats.record_miss();
            return None;
        }
        inner.stats.record_hit();
        inner.entries.get(key).map(|e| e.value.clone())
    }

    pub fn set(&self, key: &str, value: Value, ttl: Option<u64>) {
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
        self.lock().entries.insert(key.to_string(), entry);
    }

    /// Returns whether the key was present.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = now_secs();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired_at(now));
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            default_ttl: self.default_ttl,
            ..inner.stats.clone()
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(300)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_set_get_delete() {
        let cache = MemoryCache::default();
        assert_eq!(cache.default_ttl(), 300);
        cache.set("k", json!({"a": 1}), None);
        assert_eq!(cache.get("k"), Some(json!({"a": 1})));
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.get("k"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_expired_entries_removed_on_read() {
        let cache = MemoryCache::new(300);
        cache.set("short", json!("v"), Some(0));
        cache.set("long", json!("v"), None);
        sleep(Duration::from_millis(20));

        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(json!("v")));
    }

    #[test]
    fn test_cleanup_counts_removed() {
        let cache = MemoryCache::new(0);
        cache.set("a", json!(1), None);
        cache.set("b", json!(2), None);
        cache.set("c", json!(3), Some(300));
        sleep(Duration::from_millis(20));

        assert_eq!(cache.cleanup(), 2);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
