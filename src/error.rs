use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::models::ErrorResponse;

/// Failures of the external directories and stores.
///
/// These are transient from the engine's point of view: the pass that hit
/// one is aborted and the caller decides whether to retry.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Database(value.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(value: sqlx::migrate::MigrateError) -> Self {
        StoreError::Database(value.to_string())
    }
}

/// Errors surfaced by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        EngineError::InvalidState(message.into())
    }

    /// Transient failures are the only ones a retry can fix
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store(_))
    }
}

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::InvalidState(_) => StatusCode::CONFLICT,
            EngineError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let (error, message) = match self {
            EngineError::NotFound { .. } => ("not_found", self.to_string()),
            EngineError::InvalidState(_) => ("invalid_state", self.to_string()),
            EngineError::Store(e) => {
                tracing::error!("Store failure: {}", e);
                (
                    "temporarily_unavailable",
                    "A backing service is temporarily unavailable, please try again".to_string(),
                )
            }
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: error.to_string(),
            message,
            status_code: status.as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            EngineError::not_found("ride", "abc").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            EngineError::invalid_state("offer expired").status_code(),
            StatusCode::CONFLICT
        );
        let transient = EngineError::from(StoreError::Unavailable("drivers".into()));
        assert_eq!(transient.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(transient.is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = EngineError::not_found("offer", "42");
        assert_eq!(err.to_string(), "offer not found: 42");
        assert!(!err.is_retryable());
    }
}
