//! Persistence error types.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised while persisting progress or records.
///
/// Any of these ends the job as failed; the last saved state stays on disk
/// for a later resume.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State or record (de)serialisation failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored document has an unsupported layout
    #[error("unsupported state version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version read from the document
        found: u32,
        /// Version this build writes
        expected: u32,
    },

    /// Record sink rejected a write
    #[error("sink error: {0}")]
    Sink(String),

    /// Blocking persistence task did not complete
    #[error("persistence task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
