use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::TransactionStatus;
use crate::ports::{LockStoreError, RepositoryError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Illegal transaction status transition: {from} -> {to} (reason={reason})")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
        reason: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Lock store error: {0}")]
    LockStore(#[from] LockStoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Idempotent trigger failed: {0}")]
    TriggerFailed(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Repository(RepositoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::LockStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Repository(_)
            | AppError::InvalidTransition { .. }
            | AppError::Configuration(_)
            | AppError::TriggerFailed(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client faults are safe to surface verbatim to the requester.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Stable label recorded by the metrics sink when a run fails.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Repository(RepositoryError::NotFound(_)) => "not_found",
            AppError::Repository(RepositoryError::Corrupt(_)) => "data_corruption",
            AppError::Repository(_) => "store_unavailable",
            AppError::LockStore(_) => "lock_store_unavailable",
            AppError::Configuration(_) => "configuration",
            AppError::TriggerFailed(_) => "trigger_failed",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, category = self.category(), "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_not_found_error_status_code() {
        let error = AppError::NotFound("Transaction not found".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
        assert!(error.is_client_error());
    }

    #[test]
    fn test_invalid_state_error_status_code() {
        let error = AppError::InvalidState("Transaction is not in exception queue".to_string());
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
        assert!(error.is_client_error());
    }

    #[test]
    fn test_database_error_is_server_fault() {
        let error = AppError::from(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.category(), "store_unavailable");
        assert!(!error.is_client_error());
    }

    #[test]
    fn test_lock_store_error_category() {
        let error = AppError::from(LockStoreError::Timeout(Duration::from_secs(2)));
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.category(), "lock_store_unavailable");
    }

    #[test]
    fn test_invalid_transition_message() {
        let error = AppError::InvalidTransition {
            from: TransactionStatus::Settled,
            to: TransactionStatus::Captured,
            reason: "reconciliation-retry".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Illegal transaction status transition: SETTLED -> CAPTURED (reason=reconciliation-retry)"
        );
        assert_eq!(error.category(), "invalid_transition");
    }

    #[tokio::test]
    async fn test_invalid_state_error_response() {
        let error = AppError::InvalidState("not queued".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_lock_store_error_response() {
        let error = AppError::LockStore(LockStoreError::Unavailable("down".to_string()));
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
