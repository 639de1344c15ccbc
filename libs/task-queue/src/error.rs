//! Error types for the task queue library.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for task queue operations.
pub type TaskQueueResult<T> = Result<T, TaskQueueError>;

/// Errors that can occur during task queue operations.
#[derive(Error, Debug)]
pub enum TaskQueueError {
    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Task not found in the queue table
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error with context
    #[error("Task queue error: {0}")]
    Other(#[from] anyhow::Error),
}
