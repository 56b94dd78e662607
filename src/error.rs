//! Error handling for lantern discovery operations
//!
//! Only validation errors ever reach the caller of a scan. Transport,
//! parse and enrichment failures are absorbed at their layer and surface
//! as absent data.

use thiserror::Error;

/// Main error type for discovery operations
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid scan request: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Enrichment error: {0}")]
    Enrichment(String),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for discovery operations
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

impl DiscoveryError {
    /// Whether this error may cross the engine boundary to the caller.
    /// Everything else degrades to an empty contribution.
    pub fn is_caller_visible(&self) -> bool {
        matches!(self, DiscoveryError::Validation(_))
    }
}

impl From<std::net::AddrParseError> for DiscoveryError {
    fn from(e: std::net::AddrParseError) -> Self {
        DiscoveryError::Validation(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for DiscoveryError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DiscoveryError::Transport("operation timed out".to_string())
    }
}
