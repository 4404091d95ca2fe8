use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::{CoreError, ErrorReport};

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const NOT_FOUND: &str = "not_found";
    pub const INVALID_STATE: &str = "invalid_state";
    pub const STORAGE: &str = "storage_error";
    pub const CONFLICT: &str = "conflict";
    pub const RATE_LIMITED: &str = "rate_limited";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    retry_after: Option<u64>,
    report: Option<ErrorReport>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            retry_after: None,
            report: None,
        }
    }

    pub fn rate_limited(retry_after: u64) -> Self {
        let mut error = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            codes::RATE_LIMITED,
            "Rate limit exceeded",
            Some(format!("Retry after {retry_after} seconds")),
        );
        error.retry_after = Some(retry_after);
        error
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let mut api = match &err {
            CoreError::NotFound { .. } => ApiError::new(
                StatusCode::NOT_FOUND,
                codes::NOT_FOUND,
                "Resource not found",
                Some(err.to_string()),
            ),
            CoreError::InvalidState(inner) => ApiError::new(
                StatusCode::CONFLICT,
                codes::INVALID_STATE,
                "Resource is not in a valid state for this operation",
                Some(inner.to_string()),
            ),
            CoreError::Storage(_) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORAGE,
                "Storage error",
                None,
            ),
            CoreError::Conflict(detail) => ApiError::new(
                StatusCode::CONFLICT,
                codes::CONFLICT,
                "Conflicting request",
                Some(detail.clone()),
            ),
            CoreError::RateLimited { retry_after } => ApiError::rate_limited(*retry_after),
        };
        api.report = Some(ErrorReport::from_error("infra::http::api", api.status, &err));
        api
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report.unwrap_or_else(|| {
            ErrorReport::from_message(
                "infra::http::api",
                self.status,
                format!("{}: {}", self.code, self.hint.as_deref().unwrap_or(self.message)),
            )
        });
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after
            && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        // Attach a structured report so shared logging middleware can emit rich diagnostics.
        report.attach(&mut response);
        response
    }
}
