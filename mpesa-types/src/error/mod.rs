//! Error types for the gateway.

mod classify;
mod code;

pub use classify::{ClassifiedError, Failure, classify};
pub use code::{ErrorCategory, ErrorCode};

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Errors raised by the transaction correlator.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    #[error("Duplicate originator conversation id: {0}")]
    Duplicate(String),

    #[error("No matching operation: {0}")]
    NotFound(String),

    #[error("Conversation id {conversation_id} is already assigned to {existing}")]
    Conflict {
        conversation_id: String,
        existing: String,
    },

    #[error(transparent)]
    Repository(#[from] RepoError),
}

/// Application-level errors (for HTTP responses).
///
/// Maps cleanly to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Gateway(#[from] ClassifiedError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CorrelationError> for AppError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::Duplicate(id) => {
                AppError::Conflict(format!("Operation {} already exists", id))
            }
            CorrelationError::NotFound(id) => AppError::NotFound(format!("Operation {}", id)),
            e @ CorrelationError::Conflict { .. } => AppError::Conflict(e.to_string()),
            CorrelationError::Repository(RepoError::NotFound) => {
                AppError::NotFound("Resource not found".into())
            }
            CorrelationError::Repository(RepoError::Conflict(e)) => AppError::Conflict(e),
            CorrelationError::Repository(RepoError::Storage(e)) => AppError::Internal(e),
        }
    }
}
