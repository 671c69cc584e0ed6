//! Tiered TTL cache in front of store reads.
//!
//! Tier 1 is in-process ([`MemoryCache`]); tier 2 is one JSON file per key
//! ([`DiskCache`]). [`CacheManager`] reads through both and promotes disk hits.

mod disk;
mod key;
mod manager;
mod memory;

pub use disk::DiskCache;
pub use key::{CacheEntry, CacheKey, CacheStats};
pub use manager::{CacheManager, CacheManagerStats, CleanupReport};
pub use memory::MemoryCache;
