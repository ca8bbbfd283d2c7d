//! Policy engine error types.

use thiserror::Error;

use crate::validate::ValidationReport;

/// Errors that can occur while loading or watching policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The document text did not parse.
    #[error("policy parse error: {0}")]
    Parse(String),

    /// The document parsed but failed validation; the previous set
    /// stays active.
    #[error("policy validation failed: {0}")]
    Validation(ValidationReport),

    /// Reading the policy file failed.
    #[error("policy file error: {0}")]
    Io(#[from] std::io::Error),

    /// The filesystem watcher could not be installed.
    #[error("policy watch error: {0}")]
    Watch(String),
}

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
