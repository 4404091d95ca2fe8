//! Tiered cache.
//!
//! One interface over two backends:
//!
//! - **Shared**: a low-latency cache visible to every worker (optional)
//! - **Fallback**: a per-instance transient store with per-key TTL
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! shared_backend = "memory"   # or "none"
//! fallback_capacity = 10000
//! entity_ttl_seconds = 300
//! ```

mod backend;
mod config;
mod fallback;
pub mod keys;
mod lock;
mod tiered;
mod value;

use std::sync::Arc;

pub use backend::{BackendError, MemoryBackend, SharedBackend};
pub use config::{CacheConfig, SharedBackendKind};
pub use fallback::{FallbackStore, TransientStore};
pub use keys::{GroupKey, flatten_key};
pub use tiered::{CacheError, TieredCache};
pub use value::CacheValue;

pub(crate) use tiered::{METRIC_CACHE_FALLBACK, METRIC_CACHE_HIT, METRIC_CACHE_MISS};

/// Build the cache the host selected in configuration.
pub fn build_cache(config: &CacheConfig) -> TieredCache {
    let fallback = Arc::new(TransientStore::new(config));
    match config.shared_backend {
        SharedBackendKind::Memory => TieredCache::with_shared(Arc::new(MemoryBackend::new()), fallback),
        SharedBackendKind::None => TieredCache::fallback_only(fallback),
    }
}
