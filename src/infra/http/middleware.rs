use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, header::SET_COOKIE},
    middleware::Next,
    response::Response,
};
use tracing::{error, trace, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;
use crate::identity::{RequestMeta, VisitorScope};

use super::state::AppState;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Resolved visitor for the current request.
#[derive(Debug, Clone)]
pub struct VisitorContext {
    pub meta: RequestMeta,
    pub identity: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Resolve the visitor identity once per request and apply any cookies it
/// issued to the response.
pub async fn visitor_identity(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let https = request.uri().scheme_str() == Some("https");
    let meta = RequestMeta::new(request.headers().clone(), remote).with_https(https);

    let mut scope = VisitorScope::new();
    let identity = state.fingerprints.resolver().resolve(&meta, &mut scope);
    request
        .extensions_mut()
        .insert(VisitorContext { meta, identity });

    let mut response = next.run(request).await;
    for directive in scope.take_cookies() {
        match directive.header_value() {
            Some(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            None => trace!(
                target = "modreel::http::identity",
                cookie = %directive.name,
                "cookie could not be rendered as a header"
            ),
        }
    }
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "modreel::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request failed",
            );
        } else {
            warn!(
                target = "modreel::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                request_id = request_id,
                "client request error",
            );
        }
    }

    response
}
