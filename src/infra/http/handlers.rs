use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use uuid::Uuid;

use crate::application::error::{CoreError, ErrorReport};
use crate::domain::entities::VideoRecord;

use super::error::ApiError;
use super::middleware::VisitorContext;
use super::state::{AppState, REPORT_NAMESPACE, REPORTER_NAMESPACE};

#[derive(Debug, Serialize)]
pub struct FeaturedResponse {
    pub mod_id: Uuid,
    pub video: Option<VideoRecord>,
}

#[derive(Debug, Serialize)]
pub struct ModVideosResponse {
    pub mod_id: Uuid,
    pub videos: Vec<VideoRecord>,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub video_id: Uuid,
    pub report_count: u32,
    pub remaining: u32,
}

pub async fn health(State(state): State<AppState>) -> Response {
    match state.store.health_check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<VideoRecord>, ApiError> {
    Ok(Json(state.videos.get_video(id).await?))
}

pub async fn mod_videos(
    State(state): State<AppState>,
    Path(mod_id): Path<Uuid>,
) -> Result<Json<ModVideosResponse>, ApiError> {
    let videos = state.videos.list_videos(mod_id).await?;
    Ok(Json(ModVideosResponse { mod_id, videos }))
}

pub async fn featured_for_mod(
    State(state): State<AppState>,
    Path(mod_id): Path<Uuid>,
) -> Result<Json<FeaturedResponse>, ApiError> {
    let video = state.videos.list_featured(mod_id).await?;
    Ok(Json(FeaturedResponse { mod_id, video }))
}

pub async fn feature_video(
    State(state): State<AppState>,
    Path((mod_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Response, ApiError> {
    let outcome = state.featured.promote(id, mod_id).await?;
    Ok((StatusCode::OK, Json(outcome)).into_response())
}

pub async fn unfeature_video(
    State(state): State<AppState>,
    Path((mod_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<VideoRecord>, ApiError> {
    let current = state.videos.get_video(id).await?;
    if current.mod_id != mod_id {
        return Err(CoreError::not_found("video").into());
    }
    Ok(Json(state.featured.demote(id).await?))
}

pub async fn report_video(
    State(state): State<AppState>,
    Extension(visitor): Extension<VisitorContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let policy = state.report_policy;
    let fingerprint = state.fingerprints.fingerprint_identity(
        &visitor.identity,
        &visitor.meta,
        REPORT_NAMESPACE,
        None,
        Some(policy.bucket_seconds),
    );
    let decision = state
        .rate_gate
        .check(&fingerprint, &policy, visitor.meta.now.unix_timestamp())?;

    let reporter =
        state
            .fingerprints
            .stable_digest(&visitor.identity, &visitor.meta, REPORTER_NAMESPACE);
    let video = state.videos.report(id, &reporter).await?;

    let body = ReportResponse {
        video_id: video.id,
        report_count: video.report_count,
        remaining: decision.remaining,
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}
