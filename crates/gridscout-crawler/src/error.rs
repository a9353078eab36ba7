//! Crawl error types.

use crate::job::JobStatus;
use gridscout_core::ConfigError;
use gridscout_grid::GridError;
use gridscout_store::StoreError;
use thiserror::Error;

/// Errors that reject a job or end it as failed.
///
/// Agent failures never appear here; they are contained at the cell.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The job configuration was rejected before scheduling
    #[error("Invalid job configuration: {0}")]
    Configuration(String),

    /// The search area could not be partitioned
    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    /// Progress or output could not be persisted
    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    /// A lifecycle transition the state machine does not allow
    #[error("Illegal status transition from {from} to {to}")]
    InvalidTransition {
        /// Status before the attempted transition
        from: JobStatus,
        /// Requested status
        to: JobStatus,
    },
}

impl From<ConfigError> for CrawlError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type alias for crawl operations.
pub type Result<T> = std::result::Result<T, CrawlError>;
