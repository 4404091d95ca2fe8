use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics_util::debugging::DebuggingRecorder;
use time::OffsetDateTime;
use uuid::Uuid;

use modreel::application::error::CoreError;
use modreel::application::featured::FeaturedCoordinator;
use modreel::application::rate_limit::{RateGate, RatePolicy};
use modreel::cache::{
    BackendError, CacheConfig, CacheValue, MemoryBackend, SharedBackend, TieredCache,
    TransientStore,
};
use modreel::domain::entities::VideoRecord;
use modreel::domain::types::VideoStatus;
use modreel::identity::RateLimitFingerprint;
use modreel::infra::memory::MemoryStore;

/// Memory backend that can be switched off to force the fallback path.
#[derive(Default)]
struct SwitchableBackend {
    inner: MemoryBackend,
    down: AtomicBool,
}

impl SwitchableBackend {
    fn check(&self) -> Result<(), BackendError> {
        if self.down.load(Ordering::SeqCst) {
            Err(BackendError::unavailable("switched off"))
        } else {
            Ok(())
        }
    }
}

impl SharedBackend for SwitchableBackend {
    fn get(&self, key: &str, group: &str) -> Result<Option<CacheValue>, BackendError> {
        self.check()?;
        self.inner.get(key, group)
    }

    fn set(
        &self,
        key: &str,
        group: &str,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        self.check()?;
        self.inner.set(key, group, value, ttl)
    }

    fn add(
        &self,
        key: &str,
        group: &str,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        self.check()?;
        self.inner.add(key, group, value, ttl)
    }

    fn delete(&self, key: &str, group: &str) -> Result<bool, BackendError> {
        self.check()?;
        self.inner.delete(key, group)
    }

    fn incr(&self, key: &str, group: &str, offset: i64) -> Result<Option<i64>, BackendError> {
        self.check()?;
        self.inner.incr(key, group, offset)
    }

    fn decr(&self, key: &str, group: &str, offset: i64) -> Result<Option<i64>, BackendError> {
        self.check()?;
        self.inner.decr(key, group, offset)
    }
}

fn fingerprint(digest: &str) -> RateLimitFingerprint {
    RateLimitFingerprint {
        namespace: "report".to_string(),
        identity: "198.51.100.7".to_string(),
        user_agent: "metrics-test".to_string(),
        bucket_size: 60,
        time_bucket: 0,
        digest: digest.to_string(),
    }
}

#[tokio::test]
async fn cache_and_moderation_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Shared hit and miss, then fallback once the backend is down.
    let backend = Arc::new(SwitchableBackend::default());
    let fallback = Arc::new(TransientStore::new(&CacheConfig::default()));
    let cache = Arc::new(TieredCache::with_shared(backend.clone(), fallback));

    assert!(cache.get("missing", "video").is_none());
    cache.set("present", CacheValue::Number(1), "video", Duration::ZERO);
    assert_eq!(cache.get("present", "video"), Some(CacheValue::Number(1)));

    backend.down.store(true, Ordering::SeqCst);
    assert!(cache.get("present", "video").is_none());
    backend.down.store(false, Ordering::SeqCst);

    // Rate limiting.
    let gate = RateGate::new(cache.clone());
    let policy = RatePolicy {
        max_hits: 1,
        bucket_seconds: 60,
    };
    let print = fingerprint("metrics-digest");
    gate.check(&print, &policy, 1_700_000_040)
        .expect("first hit allowed");
    let err = gate
        .check(&print, &policy, 1_700_000_040)
        .expect_err("second hit limited");
    assert!(matches!(err, CoreError::RateLimited { .. }));

    // Featured promotion.
    let store = Arc::new(MemoryStore::new());
    let mod_id = Uuid::new_v4();
    let video = VideoRecord::submitted(
        mod_id,
        "Metrics",
        "https://video.example/metrics",
        OffsetDateTime::now_utc(),
    )
    .with_status(VideoStatus::Approved);
    let video_id = video.id;
    store.insert(video).await;
    let coordinator = FeaturedCoordinator::new(store, cache);
    coordinator
        .promote(video_id, mod_id)
        .await
        .expect("promotion succeeds");

    let keys: HashSet<(String, Vec<(String, String)>)> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| {
            let key = composite_key.key();
            let labels = key
                .labels()
                .map(|label| (label.key().to_string(), label.value().to_string()))
                .collect();
            (key.name().to_string(), labels)
        })
        .collect();
    let names: HashSet<&str> = keys.iter().map(|(name, _)| name.as_str()).collect();

    for metric in [
        "modreel_cache_hit_total",
        "modreel_cache_miss_total",
        "modreel_cache_fallback_total",
        "modreel_rate_limited_total",
        "modreel_featured_promote_total",
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let label = |k: &str, v: &str| vec![(k.to_string(), v.to_string())];
    assert!(keys.contains(&(
        "modreel_cache_hit_total".to_string(),
        label("tier", "shared")
    )));
    assert!(keys.contains(&(
        "modreel_cache_miss_total".to_string(),
        label("tier", "fallback")
    )));
    assert!(keys.contains(&(
        "modreel_cache_fallback_total".to_string(),
        label("op", "get")
    )));
    assert!(keys.contains(&(
        "modreel_rate_limited_total".to_string(),
        label("namespace", "report")
    )));
}
