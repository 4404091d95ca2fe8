//! In-process store used when no database is configured, and in tests.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::application::repos::{FeaturedStore, NewReport, PromoteParams, RepoError};
use crate::domain::entities::{VideoRecord, VideoReportRecord};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    videos: BTreeMap<Uuid, VideoRecord>,
    reports: Vec<VideoReportRecord>,
    reporters: HashSet<(Uuid, String)>,
}

/// Every write runs under one lock, so each call is a serialized
/// transaction. Multi-row writes happen on a scratch copy that replaces the
/// live state only when the whole write succeeds.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, video: VideoRecord) {
        self.state.lock().await.videos.insert(video.id, video);
    }

    pub async fn remove(&self, id: Uuid) -> Option<VideoRecord> {
        self.state.lock().await.videos.remove(&id)
    }

    pub async fn reports(&self, video_id: Uuid) -> Vec<VideoReportRecord> {
        self.state
            .lock()
            .await
            .reports
            .iter()
            .filter(|report| report.video_id == video_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl FeaturedStore for MemoryStore {
    async fn load_video(&self, id: Uuid) -> Result<Option<VideoRecord>, RepoError> {
        Ok(self.state.lock().await.videos.get(&id).cloned())
    }

    async fn list_videos(&self, mod_id: Uuid) -> Result<Vec<VideoRecord>, RepoError> {
        let guard = self.state.lock().await;
        let mut videos: Vec<VideoRecord> = guard
            .videos
            .values()
            .filter(|video| video.mod_id == mod_id)
            .cloned()
            .collect();
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(videos)
    }

    async fn featured_ids(&self, mod_id: Uuid) -> Result<Vec<Uuid>, RepoError> {
        Ok(self
            .state
            .lock()
            .await
            .videos
            .values()
            .filter(|video| video.mod_id == mod_id && video.is_featured)
            .map(|video| video.id)
            .collect())
    }

    async fn promote_exclusive(&self, params: PromoteParams) -> Result<Vec<Uuid>, RepoError> {
        let mut guard = self.state.lock().await;
        let mut scratch = guard.videos.clone();

        let mut demoted = Vec::new();
        for video in scratch.values_mut() {
            if video.mod_id == params.mod_id && video.id != params.video_id && video.is_featured {
                video.is_featured = false;
                video.featured_at = None;
                demoted.push(video.id);
            }
        }

        let target = scratch
            .get_mut(&params.video_id)
            .filter(|video| video.mod_id == params.mod_id && video.status.can_feature())
            .ok_or_else(|| RepoError::integrity("promote target is not an approved member of the mod"))?;
        target.is_featured = true;
        target.featured_at = Some(params.featured_at);

        guard.videos = scratch;
        Ok(demoted)
    }

    async fn clear_featured(&self, video_id: Uuid) -> Result<Option<VideoRecord>, RepoError> {
        let mut guard = self.state.lock().await;
        Ok(guard.videos.get_mut(&video_id).map(|video| {
            video.is_featured = false;
            video.featured_at = None;
            video.clone()
        }))
    }

    async fn record_report(&self, report: NewReport) -> Result<VideoRecord, RepoError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let video = state
            .videos
            .get_mut(&report.video_id)
            .ok_or(RepoError::NotFound)?;

        if !state
            .reporters
            .insert((report.video_id, report.reporter.clone()))
        {
            return Err(RepoError::Duplicate {
                constraint: "video_reports_pkey".to_string(),
            });
        }

        video.report_count = video.report_count.saturating_add(1);
        state.reports.push(VideoReportRecord {
            video_id: report.video_id,
            reporter: report.reporter,
            created_at: report.reported_at,
        });
        Ok(video.clone())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::types::VideoStatus;

    const AT: time::OffsetDateTime = datetime!(2024-05-01 12:00:00 UTC);

    fn video(mod_id: Uuid, status: VideoStatus) -> VideoRecord {
        VideoRecord::submitted(mod_id, "Clip", "https://video.example/clip", AT).with_status(status)
    }

    #[tokio::test]
    async fn failed_promote_leaves_state_untouched() {
        let store = MemoryStore::new();
        let mod_id = Uuid::new_v4();
        let featured = video(mod_id, VideoStatus::Approved);
        let pending = video(mod_id, VideoStatus::Pending);
        store.insert(featured.clone()).await;
        store.insert(pending.clone()).await;
        store
            .promote_exclusive(PromoteParams {
                mod_id,
                video_id: featured.id,
                featured_at: AT,
            })
            .await
            .expect("promote approved");

        let err = store
            .promote_exclusive(PromoteParams {
                mod_id,
                video_id: pending.id,
                featured_at: AT,
            })
            .await
            .expect_err("pending rejected under lock");

        assert!(matches!(err, RepoError::Integrity { .. }));
        assert_eq!(store.featured_ids(mod_id).await.expect("ids"), vec![featured.id]);
    }

    #[tokio::test]
    async fn promote_ignores_other_mods() {
        let store = MemoryStore::new();
        let (left, right) = (Uuid::new_v4(), Uuid::new_v4());
        let a = video(left, VideoStatus::Approved);
        let b = video(right, VideoStatus::Approved);
        store.insert(a.clone()).await;
        store.insert(b.clone()).await;

        for (mod_id, id) in [(left, a.id), (right, b.id)] {
            store
                .promote_exclusive(PromoteParams {
                    mod_id,
                    video_id: id,
                    featured_at: AT,
                })
                .await
                .expect("promote");
        }

        assert_eq!(store.featured_ids(left).await.expect("ids"), vec![a.id]);
        assert_eq!(store.featured_ids(right).await.expect("ids"), vec![b.id]);
    }

    #[tokio::test]
    async fn reports_are_unique_per_reporter() {
        let store = MemoryStore::new();
        let target = video(Uuid::new_v4(), VideoStatus::Approved);
        store.insert(target.clone()).await;

        let report = NewReport {
            video_id: target.id,
            reporter: "digest".to_string(),
            reported_at: AT,
        };
        assert_eq!(store.record_report(report.clone()).await.expect("first").report_count, 1);
        assert!(matches!(
            store.record_report(report).await,
            Err(RepoError::Duplicate { .. })
        ));
        assert_eq!(store.reports(target.id).await.len(), 1);
    }
}
