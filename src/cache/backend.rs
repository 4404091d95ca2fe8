//! Shared cache backend contract and the in-process implementation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;

use super::value::CacheValue;

/// Failure talking to a shared backend. Never surfaced past [`super::TieredCache`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("shared cache backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// A low-latency cache shared by every worker.
///
/// A `ttl` of [`Duration::ZERO`] means the entry never expires. `incr` and
/// `decr` return `Ok(None)` when the key does not exist; `decr` floors at 0.
pub trait SharedBackend: Send + Sync {
    fn get(&self, key: &str, group: &str) -> Result<Option<CacheValue>, BackendError>;

    fn set(
        &self,
        key: &str,
        group: &str,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<bool, BackendError>;

    /// Store only if the key is absent. Returns whether the value was written.
    fn add(
        &self,
        key: &str,
        group: &str,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<bool, BackendError>;

    fn delete(&self, key: &str, group: &str) -> Result<bool, BackendError>;

    fn incr(&self, key: &str, group: &str, offset: i64) -> Result<Option<i64>, BackendError>;

    fn decr(&self, key: &str, group: &str, offset: i64) -> Result<Option<i64>, BackendError>;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(value: CacheValue, ttl: Duration) -> Self {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        Self { value, expires_at }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Writes between sweeps of expired entries.
const DEFAULT_SWEEP_INTERVAL: usize = 1024;

/// Process-wide shared backend on a `DashMap`.
///
/// Counter updates hold the entry's shard lock for the whole read-modify-write,
/// so `incr`/`decr` are atomic across workers. Expired entries are dropped on
/// read and by a sweep every `sweep_interval` writes, so keys that are never
/// read again (rotated rate-limit digests) do not accumulate.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: DashMap<(String, String), StoredEntry>,
    writes: AtomicUsize,
    sweep_interval: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(sweep_interval: usize) -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicUsize::new(0),
            sweep_interval: sweep_interval.max(1),
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    // Must run with no entry guard held; `retain` locks every shard.
    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_interval == 0 {
            self.purge_expired();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn id(key: &str, group: &str) -> (String, String) {
        (group.to_string(), key.to_string())
    }

    fn adjust(&self, key: &str, group: &str, delta: i64) -> Option<i64> {
        let now = Instant::now();
        match self.entries.entry(Self::id(key, group)) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.remove();
                    return None;
                }
                let entry = occupied.get_mut();
                let next = entry.value.as_counter().saturating_add(delta).max(0);
                entry.value = CacheValue::Number(next);
                Some(next)
            }
            Entry::Vacant(_) => None,
        }
    }
}

impl SharedBackend for MemoryBackend {
    fn get(&self, key: &str, group: &str) -> Result<Option<CacheValue>, BackendError> {
        let id = Self::id(key, group);
        let now = Instant::now();
        let expired = match self.entries.get(&id) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(&id, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    fn set(
        &self,
        key: &str,
        group: &str,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        self.entries
            .insert(Self::id(key, group), StoredEntry::new(value, ttl));
        self.record_write();
        Ok(true)
    }

    fn add(
        &self,
        key: &str,
        group: &str,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        let now = Instant::now();
        let written = match self.entries.entry(Self::id(key, group)) {
            Entry::Occupied(mut occupied) if occupied.get().is_expired(now) => {
                occupied.insert(StoredEntry::new(value, ttl));
                true
            }
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::new(value, ttl));
                true
            }
        };
        if written {
            self.record_write();
        }
        Ok(written)
    }

    fn delete(&self, key: &str, group: &str) -> Result<bool, BackendError> {
        Ok(self.entries.remove(&Self::id(key, group)).is_some())
    }

    fn incr(&self, key: &str, group: &str, offset: i64) -> Result<Option<i64>, BackendError> {
        Ok(self.adjust(key, group, offset))
    }

    fn decr(&self, key: &str, group: &str, offset: i64) -> Result<Option<i64>, BackendError> {
        Ok(self.adjust(key, group, offset.saturating_neg()))
    }
}
