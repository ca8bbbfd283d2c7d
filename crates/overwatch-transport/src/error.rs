//! Transport error types.

use thiserror::Error;

/// Errors surfaced by framing and transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying stream I/O failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame body was not valid JSON-RPC.
    #[error("message parse error: {0}")]
    Parse(String),

    /// A frame exceeded the configured message size limit.
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Observed frame size in bytes.
        size: usize,
        /// Configured `max_message_size`.
        limit: usize,
    },

    /// A header block exceeded the configured header size limit.
    #[error("header block of {size} bytes exceeds limit of {limit} bytes")]
    HeaderTooLarge {
        /// Observed header block size in bytes.
        size: usize,
        /// Configured `max_header_size`.
        limit: usize,
    },

    /// The receive buffer exceeded the configured buffer size limit.
    #[error("receive buffer of {size} bytes exceeds limit of {limit} bytes")]
    BufferOverflow {
        /// Observed buffer size in bytes.
        size: usize,
        /// Configured `max_buffer_size`.
        limit: usize,
    },

    /// A `Content-Length` header was present but unusable.
    #[error("invalid Content-Length header: {0}")]
    InvalidContentLength(String),

    /// A header block terminated without any `Content-Length` header.
    #[error("header block without Content-Length header")]
    MissingContentLength,

    /// The transport was closed and can no longer send.
    #[error("transport is closed")]
    Closed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
