//! Uniform cache facade over an optional shared backend and the fallback store.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use super::backend::{BackendError, SharedBackend};
use super::fallback::FallbackStore;
use super::keys::{GroupKey, flatten_key};
use super::value::CacheValue;

pub(crate) const METRIC_CACHE_HIT: &str = "modreel_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "modreel_cache_miss_total";
pub(crate) const METRIC_CACHE_FALLBACK: &str = "modreel_cache_fallback_total";

const TIER_SHARED: &str = "shared";
const TIER_FALLBACK: &str = "fallback";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("counter `{key}` does not exist")]
    MissingCounter { key: String },
}

enum Tier {
    Shared(Arc<dyn SharedBackend>),
    FallbackOnly,
}

/// Cache facade whose backend is chosen once, at construction.
///
/// With a shared backend, a miss there is final and the fallback store is
/// only consulted when the backend reports itself unavailable. Counter
/// updates on the fallback path are read-modify-write and may undercount
/// under concurrent writers.
pub struct TieredCache {
    tier: Tier,
    fallback: Arc<dyn FallbackStore>,
}

impl TieredCache {
    pub fn with_shared(shared: Arc<dyn SharedBackend>, fallback: Arc<dyn FallbackStore>) -> Self {
        Self {
            tier: Tier::Shared(shared),
            fallback,
        }
    }

    pub fn fallback_only(fallback: Arc<dyn FallbackStore>) -> Self {
        Self {
            tier: Tier::FallbackOnly,
            fallback,
        }
    }

    pub fn has_shared_backend(&self) -> bool {
        matches!(self.tier, Tier::Shared(_))
    }

    pub fn get(&self, key: &str, group: &str) -> Option<CacheValue> {
        let (value, tier) = match &self.tier {
            Tier::Shared(shared) => match shared.get(key, group) {
                Ok(value) => (value, TIER_SHARED),
                Err(err) => {
                    degrade("get", &err);
                    (self.fallback.get(&flatten_key(key, group)), TIER_FALLBACK)
                }
            },
            Tier::FallbackOnly => (self.fallback.get(&flatten_key(key, group)), TIER_FALLBACK),
        };

        match value {
            Some(value) => {
                counter!(METRIC_CACHE_HIT, "tier" => tier).increment(1);
                Some(value)
            }
            None => {
                counter!(METRIC_CACHE_MISS, "tier" => tier).increment(1);
                None
            }
        }
    }

    pub fn get_or(&self, key: &str, group: &str, default: CacheValue) -> CacheValue {
        self.get(key, group).unwrap_or(default)
    }

    pub fn set(&self, key: &str, value: CacheValue, group: &str, ttl: Duration) -> bool {
        if let Tier::Shared(shared) = &self.tier {
            match shared.set(key, group, value.clone(), ttl) {
                Ok(stored) => return stored,
                Err(err) => degrade("set", &err),
            }
        }
        self.fallback.set(&flatten_key(key, group), value, ttl)
    }

    /// Delete from the active backend and from the fallback store.
    ///
    /// The fallback copy is cleared even when the shared backend answers, so an
    /// entry written there during an earlier outage cannot resurface in a later
    /// one.
    pub fn delete(&self, key: &str, group: &str) -> bool {
        let in_fallback = self.fallback.delete(&flatten_key(key, group));
        if let Tier::Shared(shared) = &self.tier {
            match shared.delete(key, group) {
                Ok(deleted) => return deleted,
                Err(err) => degrade("delete", &err),
            }
        }
        in_fallback
    }

    /// Delete every key, returning how many entries were present.
    pub fn invalidate<'a>(&self, keys: impl IntoIterator<Item = &'a GroupKey>) -> usize {
        keys.into_iter()
            .filter(|entry| self.delete(&entry.key, entry.group))
            .count()
    }

    /// Add `offset` (at least 1) to a counter, creating it at zero first.
    pub fn increment(&self, key: &str, offset: u32, group: &str, ttl: Duration) -> i64 {
        let offset = i64::from(offset.max(1));
        if let Tier::Shared(shared) = &self.tier {
            match increment_shared(shared.as_ref(), key, group, offset, ttl) {
                Ok(value) => return value,
                Err(err) => degrade("increment", &err),
            }
        }

        let flat = flatten_key(key, group);
        let current = self
            .fallback
            .get(&flat)
            .map(|value| value.as_counter())
            .unwrap_or(0);
        let next = current.saturating_add(offset);
        if !self.fallback.set(&flat, CacheValue::Number(next), ttl) {
            debug!(
                target = "modreel::cache",
                op = "increment",
                key = %flat,
                "fallback store rejected counter write"
            );
        }
        next
    }

    /// Subtract `offset` (at least 1) from an existing counter, flooring at zero.
    pub fn decrement(
        &self,
        key: &str,
        offset: u32,
        group: &str,
        ttl: Duration,
    ) -> Result<i64, CacheError> {
        let offset = i64::from(offset.max(1));
        if let Tier::Shared(shared) = &self.tier {
            match shared.decr(key, group, offset) {
                Ok(Some(value)) => return Ok(value.max(0)),
                Ok(None) => return Err(missing(key, group)),
                Err(err) => degrade("decrement", &err),
            }
        }

        let flat = flatten_key(key, group);
        let current = self
            .fallback
            .get(&flat)
            .ok_or_else(|| missing(key, group))?
            .as_counter();
        let next = current.saturating_sub(offset).max(0);
        self.fallback.set(&flat, CacheValue::Number(next), ttl);
        Ok(next)
    }
}

fn increment_shared(
    shared: &dyn SharedBackend,
    key: &str,
    group: &str,
    offset: i64,
    ttl: Duration,
) -> Result<i64, BackendError> {
    shared.add(key, group, CacheValue::Number(0), ttl)?;
    match shared.incr(key, group, offset)? {
        Some(value) => Ok(value),
        // Expired or deleted between add and incr.
        None => {
            shared.set(key, group, CacheValue::Number(offset), ttl)?;
            Ok(offset)
        }
    }
}

fn missing(key: &str, group: &str) -> CacheError {
    CacheError::MissingCounter {
        key: flatten_key(key, group),
    }
}

fn degrade(op: &'static str, err: &BackendError) {
    counter!(METRIC_CACHE_FALLBACK, "op" => op).increment(1);
    warn!(
        target = "modreel::cache",
        op,
        error = %err,
        result = "fallback",
        "shared cache unavailable, using fallback store"
    );
}
