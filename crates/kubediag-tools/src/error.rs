//! Error types for kubediag-tools

use thiserror::Error;

/// Tool error type
///
/// Every variant is classified as transient or permanent so the executor
/// can decide whether an invocation is worth retrying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Tool not found (unknown name, or no binding registered)
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Tool ran but reported a failure
    #[error("execution failed: {0}")]
    Execution(String),

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Permission denied by the target system
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Target API temporarily unavailable (throttled, 5xx, leader election)
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Tool registration rejected
    #[error("invalid tool registration: {0}")]
    Registration(String),
}

impl Error {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::Unavailable(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
