use std::sync::Arc;
use std::time::Duration;

use crate::application::featured::FeaturedCoordinator;
use crate::application::rate_limit::{RateGate, RatePolicy};
use crate::application::repos::FeaturedStore;
use crate::application::videos::VideoService;
use crate::cache::TieredCache;
use crate::identity::FingerprintEngine;

pub const REPORT_NAMESPACE: &str = "report";
pub const REPORTER_NAMESPACE: &str = "reporter";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FeaturedStore>,
    pub videos: Arc<VideoService>,
    pub featured: Arc<FeaturedCoordinator>,
    pub rate_gate: Arc<RateGate>,
    pub fingerprints: Arc<FingerprintEngine>,
    pub report_policy: RatePolicy,
}

impl AppState {
    /// Wire the services over one store and one cache.
    pub fn new(
        store: Arc<dyn FeaturedStore>,
        cache: Arc<TieredCache>,
        fingerprints: Arc<FingerprintEngine>,
        report_policy: RatePolicy,
        entity_ttl: Duration,
    ) -> Self {
        Self {
            videos: Arc::new(VideoService::new(store.clone(), cache.clone(), entity_ttl)),
            featured: Arc::new(FeaturedCoordinator::new(store.clone(), cache.clone())),
            rate_gate: Arc::new(RateGate::new(cache)),
            store,
            fingerprints,
            report_policy,
        }
    }
}
