//! On-disk cache tier, one JSON file per key.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::{debug, warn};

use super::key::{now_secs, CacheEntry, CacheStats};
use crate::error::{Error, Result};

/// File-per-key TTL cache.
///
/// Unreadable or malformed files are treated as misses.
#[derive(Debug)]
pub struct DiskCache {
    dir: PathBuf,
    default_ttl: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DiskCache {
    pub fn open(dir: impl Into<PathBuf>, default_ttl: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::storage(format!("Failed to create cache dir {}: {}", dir.display(), e))
        })?;
        Ok(Self {
            dir,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys keep only `[A-Za-z0-9._-]`.
    pub fn sanitize_key(key: &str) -> String {
        let safe: String = key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            .collect();
        if safe.is_empty() || safe.chars().all(|c| c == '.') {
            "_".to_string()
        } else {
            safe
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::sanitize_key(key)))
    }

    fn read_entry(&self, path: &Path) -> Option<CacheEntry> {
        let raw = fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let path = self.path_for(key);
        let Some(entry) = self.read_entry(&path) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        if entry.is_expired() {
            let _ = fs::remove_file(&path);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value)
    }

    pub fn set(&self, key: &str, value: Value, ttl: Option<u64>) -> Result<()> {
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl));
        let json = serde_json::to_string(&entry)?;
        fs::write(self.path_for(key), json)
            .map_err(|e| Error::storage(format!("Failed to write cache entry: {}", e)))
    }

    pub fn delete(&self, key: &str) -> bool {
        fs::remove_file(self.path_for(key)).is_ok()
    }

    fn entry_files(&self) -> Vec<PathBuf> {
        let pattern = self.dir.join("*.json");
        match glob::glob(&pattern.to_string_lossy()) {
            Ok(paths) => paths.filter_map(|p| p.ok()).collect(),
            Err(e) => {
                warn!(error = %e, "Invalid cache glob");
                Vec::new()
            }
        }
    }

    pub fn clear(&self) {
        for path in self.entry_files() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            }
        }
    }

    /// Remove expired entries. Malformed files are left alone.
    pub fn cleanup(&self) -> usize {
        let now = now_secs();
        let mut removed = 0;
        for path in self.entry_files() {
            if let Some(entry) = self.read_entry(&path) {
                if entry.is_expired_at(now) && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        debug!(removed, "Disk cache cleanup");
        removed
    }

    pub fn len(&self) -> usize {
        self.entry_files().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
            default_ttl: self.default_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_roundtrip_and_record_shape() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 3600).unwrap();
        cache.set("query:editor", json!(["a", "b"]), None).unwrap();

        assert_eq!(cache.get("query:editor"), Some(json!(["a", "b"])));

        let raw: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("queryeditor.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["ttl"], 3600);
        assert!(raw["timestamp"].is_f64());
        assert_eq!(raw["value"], json!(["a", "b"]));
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(DiskCache::sanitize_key("../../etc/passwd"), "....etcpasswd");
        assert_eq!(DiskCache::sanitize_key("a b/c"), "abc");
        assert_eq!(DiskCache::sanitize_key("///"), "_");
        assert_eq!(DiskCache::sanitize_key(".."), "_");
    }

    #[test]
    fn test_malformed_file_is_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 3600).unwrap();
        fs::write(dir.path().join("broken.json"), "{{{").unwrap();

        assert_eq!(cache.get("broken"), None);
        assert_eq!(cache.cleanup(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_expiry_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path(), 3600).unwrap();
        let stale = CacheEntry {
            value: json!(1),
            timestamp: now_secs() - 100.0,
            ttl: 10,
        };
        fs::write(
            dir.path().join("stale.json"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();
        fs::write(
            dir.path().join("stale2.json"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();
        cache.set("fresh", json!(2), None).unwrap();

        assert_eq!(cache.get("stale"), None);
        assert!(!dir.path().join("stale.json").exists());
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.delete("fresh"));
    }
}
