// Domain error types - store, cache and authorization failures with no information disclosure

use thiserror::Error;

/// Main error type for the coordination core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinationError {
    /// Shared store unreachable or returned a transport error (HTTP 503)
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Atomic script returned a reply of the wrong shape (HTTP 503)
    #[error("Script result error: {0}")]
    ScriptResult(String),

    /// Store call exceeded the operation timeout (HTTP 503)
    #[error("Store operation timed out after {0} ms")]
    Timeout(u64),

    /// Caller cancelled the request before the store answered (HTTP 503)
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error (HTTP 500)
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Value could not be encoded or decoded (HTTP 500)
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Caller supplied an argument the operation cannot accept (HTTP 400)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Front-door cache purge failed (HTTP 502)
    #[error("Edge purge failed: {0}")]
    EdgePurgeError(String),
}

impl CoordinationError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CoordinationError::StoreUnavailable(_) => 503,
            CoordinationError::ScriptResult(_) => 503,
            CoordinationError::Timeout(_) => 503,
            CoordinationError::Cancelled => 503,
            CoordinationError::ConfigurationError(_) => 500,
            CoordinationError::SerializationError(_) => 500,
            CoordinationError::InvalidArgument(_) => 400,
            CoordinationError::EdgePurgeError(_) => 502,
        }
    }

    /// Get user-friendly error message (no store addresses or script bodies)
    pub fn user_message(&self) -> String {
        match self {
            CoordinationError::StoreUnavailable(_)
            | CoordinationError::ScriptResult(_)
            | CoordinationError::Timeout(_)
            | CoordinationError::Cancelled => "Service temporarily unavailable".to_string(),
            CoordinationError::ConfigurationError(_) => "Internal error".to_string(),
            CoordinationError::SerializationError(_) => "Internal error".to_string(),
            CoordinationError::InvalidArgument(reason) => format!("Invalid argument: {}", reason),
            CoordinationError::EdgePurgeError(_) => "Upstream cache unavailable".to_string(),
        }
    }

    /// Whether the error comes from the shared store being unreachable or slow.
    ///
    /// Transient errors are never retried internally; callers apply their
    /// fail-open or fail-closed default once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordinationError::StoreUnavailable(_)
                | CoordinationError::ScriptResult(_)
                | CoordinationError::Timeout(_)
                | CoordinationError::Cancelled
        )
    }
}

impl From<redis::RedisError> for CoordinationError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::TypeError => CoordinationError::ScriptResult(err.to_string()),
            redis::ErrorKind::ResponseError if err.to_string().contains("WRONGTYPE") => {
                CoordinationError::ScriptResult(err.to_string())
            }
            _ => CoordinationError::StoreUnavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        CoordinationError::SerializationError(err.to_string())
    }
}
