//! Session cache error types.

use thiserror::Error;

/// Errors that can occur with the session grant cache.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Storage backend failure.
    #[error("session storage error: {0}")]
    Storage(String),

    /// A duration string was not one of the recognized forms.
    #[error("invalid grant duration: {0}")]
    InvalidDuration(String),
}

/// Result type for session cache operations.
pub type SessionResult<T> = Result<T, SessionError>;
