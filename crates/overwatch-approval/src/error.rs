//! Approval error types.

use thiserror::Error;

/// Errors an approval handler may raise.
///
/// The proxy maps a raised error onto its fail mode; the webhook
/// implementation normally fails closed instead of raising.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The request could not be serialized.
    #[error("approval serialization error: {0}")]
    Serialization(String),

    /// The transport to the approver failed.
    #[error("approval transport error: {0}")]
    Transport(String),

    /// The approver answered with something unusable.
    #[error("approval response error: {0}")]
    BadResponse(String),

    /// The overall approval deadline elapsed.
    #[error("approval timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The handler is closed.
    #[error("approval handler is closed")]
    Closed,
}

/// Result type for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
