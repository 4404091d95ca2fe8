//! Fingerprint-keyed rate gate backed by the tiered cache.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::debug;

use crate::application::error::CoreError;
use crate::cache::TieredCache;
use crate::cache::keys::rate_limit_key;
use crate::identity::RateLimitFingerprint;

pub(crate) const METRIC_RATE_LIMITED: &str = "modreel_rate_limited_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub max_hits: u32,
    pub bucket_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub hits: i64,
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Clone)]
pub struct RateGate {
    cache: Arc<TieredCache>,
}

impl RateGate {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self { cache }
    }

    /// Count one hit against `fingerprint`.
    ///
    /// The counter lives for one bucket; the next bucket has a different
    /// digest, so nothing is ever reset.
    pub fn check(
        &self,
        fingerprint: &RateLimitFingerprint,
        policy: &RatePolicy,
        now: i64,
    ) -> Result<RateDecision, CoreError> {
        let bucket_size = fingerprint.bucket_size.max(1);
        let key = rate_limit_key(&fingerprint.digest);
        let ttl = Duration::from_secs(bucket_size.unsigned_abs());
        let hits = self.cache.increment(&key.key, 1, key.group, ttl);

        if hits > i64::from(policy.max_hits) {
            let retry_after = retry_after(now, bucket_size);
            counter!(METRIC_RATE_LIMITED, "namespace" => fingerprint.namespace.clone())
                .increment(1);
            debug!(
                target = "modreel::rate_limit",
                namespace = %fingerprint.namespace,
                hits,
                limit = policy.max_hits,
                retry_after,
                "rate limit exceeded"
            );
            return Err(CoreError::RateLimited { retry_after });
        }

        let used = u32::try_from(hits).unwrap_or(u32::MAX);
        Ok(RateDecision {
            hits,
            limit: policy.max_hits,
            remaining: policy.max_hits.saturating_sub(used),
        })
    }
}

/// Seconds until the bucket containing `now` closes, never less than one.
pub fn retry_after(now: i64, bucket_size: i64) -> u64 {
    let bucket_size = bucket_size.max(1);
    let left = bucket_size - now.rem_euclid(bucket_size);
    left.max(1).unsigned_abs()
}
