//! Cache configuration.
//!
//! Selects the shared backend and sizes the per-instance fallback store.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_FALLBACK_CAPACITY: usize = 10_000;
const DEFAULT_ENTITY_TTL_SECS: u64 = 300;

/// Which shared backend the host wires in front of the fallback store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SharedBackendKind {
    /// Process-wide `DashMap` shared by every worker.
    #[default]
    Memory,
    /// No shared tier; every call goes to the fallback store.
    None,
}

/// Cache configuration from `modreel.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub shared_backend: SharedBackendKind,
    /// Maximum entries held by the fallback store before LRU eviction.
    pub fallback_capacity: usize,
    /// TTL for cached entity reads, in seconds. Zero disables expiry.
    pub entity_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shared_backend: SharedBackendKind::default(),
            fallback_capacity: DEFAULT_FALLBACK_CAPACITY,
            entity_ttl_seconds: DEFAULT_ENTITY_TTL_SECS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            shared_backend: settings.shared_backend,
            fallback_capacity: settings.fallback_capacity,
            entity_ttl_seconds: settings.entity_ttl_seconds,
        }
    }
}

impl CacheConfig {
    /// Returns the fallback capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn fallback_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.fallback_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn entity_ttl(&self) -> Duration {
        Duration::from_secs(self.entity_ttl_seconds)
    }
}
