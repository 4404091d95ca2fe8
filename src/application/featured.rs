//! Exclusive featured-state coordination across the videos of a mod.

use std::collections::BTreeSet;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::error::CoreError;
use crate::application::repos::{FeaturedStore, PromoteParams};
use crate::cache::TieredCache;
use crate::cache::keys::{GroupKey, mod_aggregate_keys, video_key};
use crate::domain::entities::VideoRecord;
use crate::domain::error::DomainError;
use crate::domain::types::VideoStatus;

pub(crate) const METRIC_FEATURED_PROMOTE: &str = "modreel_featured_promote_total";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromoteOutcome {
    pub video_id: Uuid,
    pub mod_id: Uuid,
    pub demoted: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub featured_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct FeaturedCoordinator {
    store: Arc<dyn FeaturedStore>,
    cache: Arc<TieredCache>,
}

impl FeaturedCoordinator {
    pub fn new(store: Arc<dyn FeaturedStore>, cache: Arc<TieredCache>) -> Self {
        Self { store, cache }
    }

    /// Feature `video_id` within `mod_id`, demoting whichever video held it.
    pub async fn promote(&self, video_id: Uuid, mod_id: Uuid) -> Result<PromoteOutcome, CoreError> {
        let video = self
            .store
            .load_video(video_id)
            .await
            .map_err(CoreError::storage)?
            .filter(|video| video.mod_id == mod_id)
            .ok_or_else(|| CoreError::not_found("video"))?;

        if !video.status.can_feature() {
            return Err(DomainError::invalid_state("video", video.status, VideoStatus::Approved).into());
        }

        let previously = self
            .store
            .featured_ids(mod_id)
            .await
            .map_err(CoreError::storage)?;

        let featured_at = OffsetDateTime::now_utc();
        let demoted = self
            .store
            .promote_exclusive(PromoteParams {
                mod_id,
                video_id,
                featured_at,
            })
            .await
            .map_err(CoreError::storage)?;

        let touched: BTreeSet<Uuid> = previously
            .iter()
            .chain(demoted.iter())
            .copied()
            .chain(std::iter::once(video_id))
            .collect();
        self.invalidate(mod_id, touched);

        counter!(METRIC_FEATURED_PROMOTE, "result" => "promoted").increment(1);
        info!(
            target = "modreel::featured",
            %mod_id,
            %video_id,
            demoted = demoted.len(),
            "video featured"
        );

        Ok(PromoteOutcome {
            video_id,
            mod_id,
            demoted,
            featured_at,
        })
    }

    /// Clear the featured flag on a single video.
    pub async fn demote(&self, video_id: Uuid) -> Result<VideoRecord, CoreError> {
        let video = self
            .store
            .clear_featured(video_id)
            .await
            .map_err(CoreError::storage)?
            .ok_or_else(|| CoreError::not_found("video"))?;

        self.invalidate(video.mod_id, [video.id]);
        info!(
            target = "modreel::featured",
            mod_id = %video.mod_id,
            %video_id,
            "video unfeatured"
        );
        Ok(video)
    }

    fn invalidate(&self, mod_id: Uuid, videos: impl IntoIterator<Item = Uuid>) {
        let keys: Vec<GroupKey> = videos
            .into_iter()
            .map(video_key)
            .chain(mod_aggregate_keys(mod_id))
            .collect();
        let removed = self.cache.invalidate(&keys);
        debug!(
            target = "modreel::featured",
            %mod_id,
            keys = keys.len(),
            removed,
            "featured caches invalidated"
        );
    }
}
