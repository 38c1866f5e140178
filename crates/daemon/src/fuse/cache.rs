//! Negative-lookup cache.
//!
//! Absence is the common case under a kernel that probes paths eagerly, and
//! every miss otherwise costs a round trip to the store. Entries are keyed
//! on `(parent_ino, name)` so they die with the parent's identity, bounded
//! in number, and expire on a short TTL; mutations that make a name exist
//! again invalidate eagerly.

use std::time::Duration;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};

/// Tuning for [`NegativeCache`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegativeCacheConfig {
    /// TTL for cached misses, in seconds.
    pub ttl_secs: u32,
    /// Maximum number of cached misses.
    pub capacity: u64,
}

impl Default for NegativeCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 10,
            capacity: 10_000,
        }
    }
}

#[derive(Clone)]
pub struct NegativeCache {
    inner: Cache<(u64, String), ()>,
}

impl NegativeCache {
    pub fn new(config: NegativeCacheConfig) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(Duration::from_secs(config.ttl_secs as u64))
                .max_capacity(config.capacity)
                .build(),
        }
    }

    /// Was `(parent, name)` recently confirmed absent?
    pub fn is_negative(&self, parent_ino: u64, name: &str) -> bool {
        self.inner.contains_key(&(parent_ino, name.to_owned()))
    }

    /// Record a confirmed miss.
    pub fn insert(&self, parent_ino: u64, name: &str) {
        self.inner.insert((parent_ino, name.to_owned()), ());
    }

    /// Drop a cached miss, after a mutation made the name real.
    pub fn invalidate(&self, parent_ino: u64, name: &str) {
        self.inner.invalidate(&(parent_ino, name.to_owned()));
    }
}

impl std::fmt::Debug for NegativeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegativeCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_hit() {
        let cache = NegativeCache::new(NegativeCacheConfig::default());
        assert!(!cache.is_negative(1, "ghost"));
        cache.insert(1, "ghost");
        assert!(cache.is_negative(1, "ghost"));
        // A different parent is a different key.
        assert!(!cache.is_negative(2, "ghost"));
    }

    #[test]
    fn invalidate_clears_the_entry() {
        let cache = NegativeCache::new(NegativeCacheConfig::default());
        cache.insert(1, "f");
        cache.invalidate(1, "f");
        assert!(!cache.is_negative(1, "f"));
    }
}
