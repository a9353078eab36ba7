use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

/// Failures of a whole extraction call. When `fetch_cell` returns one of
/// these the cell is abandoned and the job moves on.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("search returned no results container: {0}")]
    EmptyResult(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl AgentError {
    /// Whether another attempt at the same cell may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Navigation(_) | Self::RateLimited(_))
    }
}

/// Failures of a single listing. The listing is skipped; the cell continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("listing has no source token")]
    MissingToken,

    #[error("no place identifier in token: {0}")]
    UnrecognizedToken(String),

    #[error("invalid {field}: {reason}")]
    InvalidPayload { field: &'static str, reason: String },
}
