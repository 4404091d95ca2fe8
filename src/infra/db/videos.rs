use async_trait::async_trait;
use sqlx::FromRow;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::application::repos::{FeaturedStore, NewReport, PromoteParams, RepoError};
use crate::domain::entities::VideoRecord;
use crate::domain::types::VideoStatus;

use super::PostgresRepositories;
use super::util::map_sqlx_error;

const VIDEO_COLUMNS: &str =
    "id, mod_id, title, url, status, is_featured, featured_at, report_count, created_at";

#[derive(Debug, FromRow)]
struct VideoRow {
    id: Uuid,
    mod_id: Uuid,
    title: String,
    url: String,
    status: VideoStatus,
    is_featured: bool,
    featured_at: Option<OffsetDateTime>,
    report_count: i32,
    created_at: OffsetDateTime,
}

impl TryFrom<VideoRow> for VideoRecord {
    type Error = RepoError;

    fn try_from(row: VideoRow) -> Result<Self, Self::Error> {
        let report_count = u32::try_from(row.report_count)
            .map_err(|_| RepoError::integrity("report_count is negative"))?;
        Ok(VideoRecord {
            id: row.id,
            mod_id: row.mod_id,
            title: row.title,
            url: row.url,
            status: row.status,
            is_featured: row.is_featured,
            featured_at: row.featured_at,
            report_count,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl FeaturedStore for PostgresRepositories {
    async fn load_video(&self, id: Uuid) -> Result<Option<VideoRecord>, RepoError> {
        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(VideoRecord::try_from).transpose()
    }

    async fn list_videos(&self, mod_id: Uuid) -> Result<Vec<VideoRecord>, RepoError> {
        let rows = sqlx::query_as::<_, VideoRow>(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE mod_id = $1 ORDER BY created_at DESC, id"
        ))
        .bind(mod_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(VideoRecord::try_from).collect()
    }

    async fn featured_ids(&self, mod_id: Uuid) -> Result<Vec<Uuid>, RepoError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM videos WHERE mod_id = $1 AND is_featured ORDER BY featured_at DESC",
        )
        .bind(mod_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn promote_exclusive(&self, params: PromoteParams) -> Result<Vec<Uuid>, RepoError> {
        let PromoteParams {
            mod_id,
            video_id,
            featured_at,
        } = params;

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        // Lock the whole group so concurrent promotes queue here.
        sqlx::query("SELECT id FROM videos WHERE mod_id = $1 ORDER BY id FOR UPDATE")
            .bind(mod_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let demoted = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE videos
            SET is_featured = FALSE, featured_at = NULL
            WHERE mod_id = $1 AND id <> $2 AND is_featured
            RETURNING id
            "#,
        )
        .bind(mod_id)
        .bind(video_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let promoted = sqlx::query(
            r#"
            UPDATE videos
            SET is_featured = TRUE, featured_at = $3
            WHERE id = $1 AND mod_id = $2 AND status = 'approved'::video_status
            "#,
        )
        .bind(video_id)
        .bind(mod_id)
        .bind(featured_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if promoted.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            debug!(
                target = "modreel::db",
                %mod_id,
                %video_id,
                "promote rolled back; target no longer approved"
            );
            return Err(RepoError::integrity(
                "promote target is not an approved member of the mod",
            ));
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(demoted)
    }

    async fn clear_featured(&self, video_id: Uuid) -> Result<Option<VideoRecord>, RepoError> {
        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "UPDATE videos SET is_featured = FALSE, featured_at = NULL \
             WHERE id = $1 RETURNING {VIDEO_COLUMNS}"
        ))
        .bind(video_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(VideoRecord::try_from).transpose()
    }

    async fn record_report(&self, report: NewReport) -> Result<VideoRecord, RepoError> {
        let NewReport {
            video_id,
            reporter,
            reported_at,
        } = report;

        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            "INSERT INTO video_reports (video_id, reporter, created_at) VALUES ($1, $2, $3)",
        )
        .bind(video_id)
        .bind(&reporter)
        .bind(reported_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let row = sqlx::query_as::<_, VideoRow>(&format!(
            "UPDATE videos SET report_count = report_count + 1 \
             WHERE id = $1 RETURNING {VIDEO_COLUMNS}"
        ))
        .bind(video_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        VideoRecord::try_from(row)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        PostgresRepositories::health_check(self)
            .await
            .map_err(map_sqlx_error)
    }
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;
    use time::macros::datetime;

    use super::*;

    const AT: OffsetDateTime = datetime!(2024-05-01 12:00:00 UTC);

    async fn insert(repos: &PostgresRepositories, mod_id: Uuid, status: VideoStatus) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO videos (id, mod_id, title, url, status, created_at) \
             VALUES ($1, $2, 'Clip', $3, $4, $5)",
        )
        .bind(id)
        .bind(mod_id)
        .bind(format!("https://video.example/{id}"))
        .bind(status)
        .bind(AT)
        .execute(repos.pool())
        .await
        .expect("insert video");
        id
    }

    fn promote(mod_id: Uuid, video_id: Uuid) -> PromoteParams {
        PromoteParams {
            mod_id,
            video_id,
            featured_at: AT,
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres database"]
    async fn promote_keeps_one_featured_row(pool: PgPool) {
        let repos = PostgresRepositories::new(pool);
        let mod_id = Uuid::new_v4();
        let a = insert(&repos, mod_id, VideoStatus::Approved).await;
        let c = insert(&repos, mod_id, VideoStatus::Approved).await;

        repos.promote_exclusive(promote(mod_id, a)).await.expect("promote a");
        let demoted = repos.promote_exclusive(promote(mod_id, c)).await.expect("promote c");

        assert_eq!(demoted, vec![a]);
        assert_eq!(repos.featured_ids(mod_id).await.expect("ids"), vec![c]);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres database"]
    async fn concurrent_promotes_serialize_on_the_group_lock(pool: PgPool) {
        let repos = PostgresRepositories::new(pool);
        let mod_id = Uuid::new_v4();
        let a = insert(&repos, mod_id, VideoStatus::Approved).await;
        let b = insert(&repos, mod_id, VideoStatus::Approved).await;
        let c = insert(&repos, mod_id, VideoStatus::Approved).await;
        repos.promote_exclusive(promote(mod_id, a)).await.expect("promote a");

        for _ in 0..10 {
            let (left, right) = tokio::join!(
                repos.promote_exclusive(promote(mod_id, b)),
                repos.promote_exclusive(promote(mod_id, c)),
            );
            left.expect("promote b");
            right.expect("promote c");

            let featured: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM videos WHERE mod_id = $1 AND is_featured",
            )
            .bind(mod_id)
            .fetch_one(repos.pool())
            .await
            .expect("count featured");
            assert_eq!(featured, 1);

            let ids = repos.featured_ids(mod_id).await.expect("ids");
            assert!(ids == vec![b] || ids == vec![c], "unexpected winners: {ids:?}");
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres database"]
    async fn unapproved_target_rolls_back(pool: PgPool) {
        let repos = PostgresRepositories::new(pool);
        let mod_id = Uuid::new_v4();
        let a = insert(&repos, mod_id, VideoStatus::Approved).await;
        let pending = insert(&repos, mod_id, VideoStatus::Pending).await;
        repos.promote_exclusive(promote(mod_id, a)).await.expect("promote a");

        let err = repos
            .promote_exclusive(promote(mod_id, pending))
            .await
            .expect_err("pending rejected");

        assert!(matches!(err, RepoError::Integrity { .. }));
        assert_eq!(repos.featured_ids(mod_id).await.expect("ids"), vec![a]);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres database"]
    async fn duplicate_report_is_rejected(pool: PgPool) {
        let repos = PostgresRepositories::new(pool);
        let id = insert(&repos, Uuid::new_v4(), VideoStatus::Approved).await;
        let report = NewReport {
            video_id: id,
            reporter: "digest".to_string(),
            reported_at: AT,
        };

        let video = repos.record_report(report.clone()).await.expect("first report");
        assert_eq!(video.report_count, 1);
        assert!(matches!(
            repos.record_report(report).await,
            Err(RepoError::Duplicate { .. })
        ));
        let video = repos.load_video(id).await.expect("load").expect("row");
        assert_eq!(video.report_count, 1);
    }
}
