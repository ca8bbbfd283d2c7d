//! Audit error types.

use thiserror::Error;

/// Errors that can occur while recording or exporting audit entries.
///
/// Storage failures are non-fatal to request flow: callers log and
/// continue rather than failing the tool call being audited.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Storage backend failure.
    #[error("audit storage error: {0}")]
    Storage(String),

    /// Serialization failure during export.
    #[error("audit serialization error: {0}")]
    Serialization(String),

    /// Unknown export format name.
    #[error("unknown export format: {0}")]
    UnknownFormat(String),
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
