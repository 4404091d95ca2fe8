//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::VideoRecord;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteParams {
    pub mod_id: Uuid,
    pub video_id: Uuid,
    pub featured_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReport {
    pub video_id: Uuid,
    pub reporter: String,
    pub reported_at: OffsetDateTime,
}

/// Transactional store for videos and their featured state.
#[async_trait]
pub trait FeaturedStore: Send + Sync {
    async fn load_video(&self, id: Uuid) -> Result<Option<VideoRecord>, RepoError>;

    /// Every video of the mod, newest first.
    async fn list_videos(&self, mod_id: Uuid) -> Result<Vec<VideoRecord>, RepoError>;

    /// Ids of every video in the mod currently marked featured.
    async fn featured_ids(&self, mod_id: Uuid) -> Result<Vec<Uuid>, RepoError>;

    /// Demote every other featured video in the mod and feature
    /// `params.video_id`, all in one transaction. Returns the ids that were
    /// demoted.
    ///
    /// Fails with [`RepoError::Integrity`] and leaves the mod untouched when
    /// the target is no longer an approved member of the mod once locked.
    async fn promote_exclusive(&self, params: PromoteParams) -> Result<Vec<Uuid>, RepoError>;

    /// Clear the featured flag on a single video, returning the updated row.
    async fn clear_featured(&self, video_id: Uuid) -> Result<Option<VideoRecord>, RepoError>;

    /// Insert a report and bump the video's report count in the same
    /// transaction. A repeat reporter yields [`RepoError::Duplicate`].
    async fn record_report(&self, report: NewReport) -> Result<VideoRecord, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }
}
