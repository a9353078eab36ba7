//! Grid error types.

use gridscout_core::ConfigError;
use thiserror::Error;

/// Result type alias for grid operations.
pub type Result<T> = std::result::Result<T, GridError>;

/// Errors raised while partitioning a search area.
#[derive(Debug, Error)]
pub enum GridError {
    /// The bounding box is degenerate or out of range
    #[error("invalid bounds: {0}")]
    InvalidBounds(#[from] ConfigError),

    /// Grid dimension outside `1..=max`
    #[error("grid size must be between 1 and {max}, got {got}")]
    InvalidGridSize {
        /// Requested dimension
        got: u32,
        /// Largest accepted dimension
        max: u32,
    },

    /// Zoom outside `1..=21`
    #[error("zoom must be between 1 and 21, got {0}")]
    InvalidZoom(u8),
}
