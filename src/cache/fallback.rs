//! Per-instance fallback store with per-key TTL.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};
use super::value::CacheValue;

const SOURCE: &str = "cache::fallback";

/// Slower store used when no shared backend exists. Keys are already
/// flattened; see [`super::keys::flatten_key`].
pub trait FallbackStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheValue>;

    /// A `ttl` of [`Duration::ZERO`] means no expiry.
    fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> bool;

    fn delete(&self, key: &str) -> bool;
}

struct Transient {
    value: CacheValue,
    expires_at: Option<Instant>,
}

/// LRU-bounded transient store. Expired entries are dropped on read.
pub struct TransientStore {
    entries: RwLock<LruCache<String, Transient>>,
}

impl TransientStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.fallback_capacity_non_zero())),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FallbackStore for TransientStore {
    fn get(&self, key: &str) -> Option<CacheValue> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let expired = entries
            .get(key)
            .map(|entry| entry.expires_at.is_some_and(|at| at <= Instant::now()))?;
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> bool {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        rw_write(&self.entries, SOURCE, "set").put(key.to_string(), Transient { value, expires_at });
        true
    }

    fn delete(&self, key: &str) -> bool {
        rw_write(&self.entries, SOURCE, "delete").pop(key).is_some()
    }
}
