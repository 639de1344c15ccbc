/// Error types for leaderboard-service
///
/// Errors are converted to appropriate HTTP responses for API clients.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Task queue error: {0}")]
    Queue(#[from] task_queue::TaskQueueError),

    #[error("Rank update failed after {attempts} attempts: {last_error}")]
    RankUpdateFailed { attempts: u32, last_error: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for store failures worth retrying before giving up on a rank
    /// write: serialization failures, deadlocks, lock timeouts, pool
    /// exhaustion. Anything else is terminal for the current attempt.
    pub fn is_transient_contention(&self) -> bool {
        match self {
            AppError::Database(err) => is_transient_db_error(err),
            _ => false,
        }
    }
}

fn is_transient_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            // serialization_failure, deadlock_detected, lock_not_available
            Some("40001") | Some("40P01") | Some("55P03")
        ),
        _ => false,
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Database(_)
            | AppError::Cache(_)
            | AppError::Queue(_)
            | AppError::RankUpdateFailed { .. }
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        HttpResponse::build(status).json(serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Validation("score".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NotFound("player".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Forbidden("admin token".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::RankUpdateFailed {
                attempts: 3,
                last_error: "deadlock".into()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        let err = AppError::Database(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient_contention());
    }

    #[test]
    fn test_row_not_found_is_not_transient() {
        let err = AppError::Database(sqlx::Error::RowNotFound);
        assert!(!err.is_transient_contention());
    }

    #[test]
    fn test_non_database_errors_are_not_transient() {
        assert!(!AppError::Validation("negative score".into()).is_transient_contention());
        assert!(!AppError::NotFound("player".into()).is_transient_contention());
    }
}
