//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::VideoStatus;

/// A video submitted for a mod. `mod_id` is the featured-state group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: Uuid,
    pub mod_id: Uuid,
    pub title: String,
    pub url: String,
    pub status: VideoStatus,
    pub is_featured: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub featured_at: Option<OffsetDateTime>,
    pub report_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoReportRecord {
    pub video_id: Uuid,
    pub reporter: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl VideoRecord {
    /// A fresh, unfeatured submission awaiting moderation.
    pub fn submitted(
        mod_id: Uuid,
        title: impl Into<String>,
        url: impl Into<String>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            mod_id,
            title: title.into(),
            url: url.into(),
            status: VideoStatus::Pending,
            is_featured: false,
            featured_at: None,
            report_count: 0,
            created_at,
        }
    }

    pub fn with_status(mut self, status: VideoStatus) -> Self {
        self.status = status;
        self
    }
}
