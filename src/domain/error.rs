use thiserror::Error;

use crate::domain::types::VideoStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain entity `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("{entity} is `{actual}`, expected `{expected}`")]
    InvalidState {
        entity: &'static str,
        actual: VideoStatus,
        expected: VideoStatus,
    },
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn invalid_state(entity: &'static str, actual: VideoStatus, expected: VideoStatus) -> Self {
        Self::InvalidState {
            entity,
            actual,
            expected,
        }
    }
}
