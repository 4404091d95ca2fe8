//! JSON HTTP surface.

mod error;
mod handlers;
mod middleware;
mod state;

pub use error::{ApiError, ApiErrorBody, ApiErrorMessage, codes};
pub use middleware::{RequestContext, VisitorContext};
pub use state::{AppState, REPORT_NAMESPACE, REPORTER_NAMESPACE};

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};

use handlers::{
    feature_video, featured_for_mod, get_video, health, mod_videos, report_video, unfeature_video,
};
use middleware::{log_responses, set_request_context, visitor_identity};

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/videos/{id}", get(get_video))
        .route("/videos/{id}/report", post(report_video))
        .route("/mods/{mod_id}/videos", get(mod_videos))
        .route("/mods/{mod_id}/featured", get(featured_for_mod))
        .route(
            "/mods/{mod_id}/videos/{id}/feature",
            post(feature_video).delete(unfeature_video),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            visitor_identity,
        ))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
