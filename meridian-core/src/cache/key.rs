//! Cache keys, entries, and hit statistics.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Filesystem-safe cache key derived from arbitrary input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Hash `parts` under a namespace prefix, e.g. `recall-<sha256>`.
    pub fn generate(namespace: &str, parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update(b"\n");
        }
        CacheKey(format!("{}-{:x}", namespace, hasher.finalize()))
    }

    /// Hash raw content with no namespace.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        CacheKey(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// A cached value with its write time and time-to-live.
///
/// This is also the on-disk record shape: `{value, timestamp, ttl}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    /// Write time in Unix seconds
    pub timestamp: f64,
    /// Lifetime in seconds
    pub ttl: u64,
}

impl CacheEntry {
    pub fn new(value: Value, ttl: u64) -> Self {
        Self {
            value,
            timestamp: now_secs(),
            ttl,
        }
    }

    /// Expired once strictly more than `ttl` seconds have passed.
    pub fn is_expired_at(&self, now: f64) -> bool {
        now - self.timestamp > self.ttl as f64
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_secs())
    }
}

/// Per-tier counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Live entries at the time the stats were taken
    pub entries: usize,
    pub default_ttl: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable_and_safe() {
        let a = CacheKey::generate("recall", &["editor", "5"]);
        let b = CacheKey::generate("recall", &["editor", "5"]);
        let c = CacheKey::generate("recall", &["editor", "6"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("recall-"));
        assert!(a
            .as_str()
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-'));
        assert_eq!(CacheKey::from_content("x").as_str().len(), 64);
    }

    #[test]
    fn test_entry_expiry_is_strict() {
        let entry = CacheEntry {
            value: Value::from(1),
            timestamp: 100.0,
            ttl: 10,
        };
        assert!(!entry.is_expired_at(110.0));
        assert!(entry.is_expired_at(110.5));
    }

    #[test]
    fn test_hit_rate() {
        let mut stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }
}
