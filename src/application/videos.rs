//! Cached video reads and visitor reports.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::error::CoreError;
use crate::application::repos::{FeaturedStore, NewReport, RepoError};
use crate::cache::keys::{
    GroupKey, mod_aggregate_keys, mod_featured_key, mod_videos_key, video_key,
};
use crate::cache::{CacheValue, TieredCache};
use crate::domain::entities::VideoRecord;

#[derive(Clone)]
pub struct VideoService {
    store: Arc<dyn FeaturedStore>,
    cache: Arc<TieredCache>,
    entity_ttl: Duration,
}

impl VideoService {
    pub fn new(store: Arc<dyn FeaturedStore>, cache: Arc<TieredCache>, entity_ttl: Duration) -> Self {
        Self {
            store,
            cache,
            entity_ttl,
        }
    }

    pub async fn get_video(&self, id: Uuid) -> Result<VideoRecord, CoreError> {
        let key = video_key(id);
        if let Some(video) = self.cached::<VideoRecord>(&key) {
            return Ok(video);
        }

        let video = self
            .store
            .load_video(id)
            .await
            .map_err(CoreError::storage)?
            .ok_or_else(|| CoreError::not_found("video"))?;
        self.fill(&key, &video);
        Ok(video)
    }

    /// The featured video of a mod, if one is set.
    pub async fn list_featured(&self, mod_id: Uuid) -> Result<Option<VideoRecord>, CoreError> {
        let key = mod_featured_key(mod_id);
        if let Some(featured) = self.cached::<Option<VideoRecord>>(&key) {
            return Ok(featured);
        }

        let ids = self
            .store
            .featured_ids(mod_id)
            .await
            .map_err(CoreError::storage)?;
        let featured = match ids.first() {
            Some(id) => self.store.load_video(*id).await.map_err(CoreError::storage)?,
            None => None,
        };
        self.fill(&key, &featured);
        Ok(featured)
    }

    pub async fn list_videos(&self, mod_id: Uuid) -> Result<Vec<VideoRecord>, CoreError> {
        let key = mod_videos_key(mod_id);
        if let Some(videos) = self.cached::<Vec<VideoRecord>>(&key) {
            return Ok(videos);
        }

        let videos = self
            .store
            .list_videos(mod_id)
            .await
            .map_err(CoreError::storage)?;
        self.fill(&key, &videos);
        Ok(videos)
    }

    /// File a report from `reporter`. Each reporter counts once per video.
    pub async fn report(&self, video_id: Uuid, reporter: &str) -> Result<VideoRecord, CoreError> {
        let video = self
            .store
            .record_report(NewReport {
                video_id,
                reporter: reporter.to_string(),
                reported_at: OffsetDateTime::now_utc(),
            })
            .await
            .map_err(|err| match err {
                RepoError::NotFound => CoreError::not_found("video"),
                RepoError::Duplicate { .. } => {
                    CoreError::Conflict("video already reported by this visitor".to_string())
                }
                other => CoreError::storage(other),
            })?;

        let keys: Vec<GroupKey> = std::iter::once(video_key(video_id))
            .chain(mod_aggregate_keys(video.mod_id))
            .collect();
        self.cache.invalidate(&keys);
        debug!(
            target = "modreel::videos",
            %video_id,
            report_count = video.report_count,
            "video reported"
        );
        Ok(video)
    }

    fn cached<T: DeserializeOwned>(&self, key: &GroupKey) -> Option<T> {
        let value = self.cache.get(&key.key, key.group)?;
        let bytes = value.as_bytes()?;
        match serde_json::from_slice(bytes) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(
                    target = "modreel::videos",
                    key = %key.flattened(),
                    error = %err,
                    "discarding undecodable cache entry"
                );
                self.cache.delete(&key.key, key.group);
                None
            }
        }
    }

    fn fill<T: Serialize>(&self, key: &GroupKey, value: &T) {
        let stored = match serde_json::to_vec(value) {
            Ok(encoded) => {
                self.cache
                    .set(&key.key, CacheValue::Bytes(Bytes::from(encoded)), key.group, self.entity_ttl)
            }
            Err(err) => {
                warn!(target = "modreel::videos", error = %err, "failed to encode cache entry");
                false
            }
        };
        if !stored {
            warn!(
                target = "modreel::videos",
                key = %key.flattened(),
                "cache write failed; serving uncached"
            );
        }
    }
}
