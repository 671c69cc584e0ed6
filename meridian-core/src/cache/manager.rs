//! Two-tier cache facade.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::disk::DiskCache;
use super::key::CacheStats;
use super::memory::MemoryCache;
use crate::config::MeridianConfig;
use crate::error::Result;

/// Removed-entry counts per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub memory: usize,
    pub disk: usize,
}

/// Stats per tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheManagerStats {
    pub memory: CacheStats,
    pub disk: Option<CacheStats>,
}

/// Memory tier in front of an optional disk tier.
#[derive(Debug)]
pub struct CacheManager {
    memory: MemoryCache,
    disk: Option<DiskCache>,
}

impl CacheManager {
    /// Memory-only cache.
    pub fn memory_only(default_ttl: u64) -> Self {
        Self {
            memory: MemoryCache::new(default_ttl),
            disk: None,
        }
    }

    pub fn new(memory: MemoryCache, disk: Option<DiskCache>) -> Self {
        Self { memory, disk }
    }

    /// Build both tiers from configuration.
    pub fn from_config(config: &MeridianConfig) -> Result<Self> {
        let memory = MemoryCache::new(config.cache.memory_ttl_secs);
        let disk = if config.cache.disk_enabled {
            Some(DiskCache::open(
                config.disk_cache_dir(),
                config.cache.disk_ttl_secs,
            )?)
        } else {
            None
        };
        Ok(Self { memory, disk })
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn disk(&self) -> Option<&DiskCache> {
        self.disk.as_ref()
    }

    /// Memory first, then disk. Disk hits are promoted into memory.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.memory.get(key) {
            return Some(value);
        }
        let value = self.disk.as_ref()?.get(key)?;
        debug!(key, "Promoting disk cache hit");
        self.memory.set(key, value.clone(), None);
        Some(value)
    }

    /// Typed `get`. Values that no longer deserialize count as misses.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        serde_json::from_value(self.get(key)?).ok()
    }

    /// Always writes memory; writes disk only when `persist` is set.
    pub fn set(&self, key: &str, value: Value, ttl: Option<u64>, persist: bool) {
        if persist {
            if let Some(disk) = &self.disk {
                if let Err(e) = disk.set(key, value.clone(), ttl) {
                    warn!(key, error = %e, "Disk cache write failed");
                }
            }
        }
        self.memory.set(key, value, ttl);
    }

    pub fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Option<u64>, persist: bool) {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, value, ttl, persist),
            Err(e) => warn!(key, error = %e, "Value not cacheable"),
        }
    }

    /// Delete from every tier; true if any tier held the key.
    pub fn delete(&self, key: &str) -> bool {
        let in_memory = self.memory.delete(key);
        let on_disk = self.disk.as_ref().is_some_and(|d| d.delete(key));
        in_memory || on_disk
    }

    pub fn clear(&self) {
        self.memory.clear();
        if let Some(disk) = &self.disk {
            disk.clear();
        }
    }

    pub fn cleanup(&self) -> CleanupReport {
        CleanupReport {
            memory: self.memory.cleanup(),
            disk: self.disk.as_ref().map_or(0, DiskCache::cleanup),
        }
    }

    pub fn stats(&self) -> CacheManagerStats {
        CacheManagerStats {
            memory: self.memory.stats(),
            disk: self.disk.as_ref().map(DiskCache::stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use serde_json::json;

    fn manager(dir: &std::path::Path) -> CacheManager {
        let config = MeridianConfig::new(dir).with_cache(CacheConfig::default());
        CacheManager::from_config(&config).unwrap()
    }

    #[test]
    fn test_set_defaults_to_memory_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = manager(dir.path());
        cache.set("k", json!(1), None, false);

        assert_eq!(cache.get("k"), Some(json!(1)));
        assert_eq!(cache.disk().unwrap().get("k"), None);
    }

    #[test]
    fn test_disk_hit_promotes_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = manager(dir.path());
        cache.set("k", json!({"answer": "x"}), None, true);
        cache.memory().clear();

        assert_eq!(cache.get("k"), Some(json!({"answer": "x"})));
        assert_eq!(cache.memory().get("k"), Some(json!({"answer": "x"})));
    }

    #[test]
    fn test_delete_fans_out() {
        let dir = tempfile::tempdir().unwrap();
        let cache = manager(dir.path());
        cache.set("k", json!(1), None, true);

        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_typed_access() {
        let cache = CacheManager::memory_only(300);
        cache.set_as("nums", &vec![1, 2, 3], None, false);
        assert_eq!(cache.get_as::<Vec<i32>>("nums"), Some(vec![1, 2, 3]));
        assert_eq!(cache.get_as::<String>("nums"), None);
        assert!(cache.stats().disk.is_none());
        assert_eq!(cache.cleanup(), CleanupReport::default());
    }
}
