//! Error types surfaced to callers of the chat core.

use thiserror::Error;

/// Errors raised by a persistence or expiring-store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated; another writer got there first.
    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    /// The backing store failed.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Chat operation errors.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Unknown thread or token, or the caller is not a member of the thread.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requester may not chat with the target.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A required field is missing or empty.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Persistence collaborator failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::NotFound(_) => "not_found",
            ChatError::PermissionDenied(_) => "permission_denied",
            ChatError::Validation(_) => "validation",
            ChatError::Store(_) => "store",
            ChatError::Internal(_) => "internal",
        }
    }
}

/// Result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
