//! Dispatch error types.

use crate::types::MessageId;
use thiserror::Error;

/// Dispatch error type.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// SQLite error raised by the reference store
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Transactional insert or update failed in a non-SQLite store
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// A media story resolved to zero attachments
    #[error("No attachment for media story message {0}")]
    MissingAttachment(MessageId),

    /// The targeted message no longer exists
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    /// Registration discovery failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Submitting work to the job engine failed after commit
    #[error("Job submission failed: {0}")]
    JobSubmission(String),

    /// Caller broke a precondition of the operation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DispatchError {
    /// Returns true if the error rolled back a transactional batch.
    pub fn aborted_batch(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(_) | Self::Persistence(_) | Self::MissingAttachment(_)
        )
    }
}

/// Result type alias using DispatchError.
pub type DispatchResult<T> = Result<T, DispatchError>;
