use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{
    application::repos::RepoError, config::LoadError, domain::error::DomainError,
    identity::FingerprintError, infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Failures surfaced by the application services.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error(transparent)]
    InvalidState(DomainError),
    #[error("storage error")]
    Storage(#[source] RepoError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited; retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
}

impl CoreError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn storage(err: RepoError) -> Self {
        Self::Storage(err)
    }
}

impl From<DomainError> for CoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { entity } => Self::NotFound { entity },
            other @ DomainError::InvalidState { .. } => Self::InvalidState(other),
        }
    }
}

impl From<RepoError> for CoreError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => Self::NotFound { entity: "record" },
            RepoError::Duplicate { constraint } => {
                Self::Conflict(format!("unique constraint `{constraint}` violated"))
            }
            other => Self::Storage(other),
        }
    }
}

/// Startup and infrastructure failures reported by the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
