//! Proxy error types and the JSON-RPC error code table.

use thiserror::Error;

/// JSON-RPC server-error codes the proxy emits (-32000..-32099 range).
pub mod codes {
    /// Denied by policy or user.
    pub const TOOL_DENIED: i64 = -32001;
    /// Upstream is not serving requests.
    pub const UPSTREAM_UNAVAILABLE: i64 = -32002;
    /// No response within the timeout window.
    pub const REQUEST_TIMEOUT: i64 = -32003;
    /// Frame exceeded the size limit.
    pub const REQUEST_TOO_LARGE: i64 = -32004;
    /// Too many recent upstream failures.
    pub const CIRCUIT_BREAKER_OPEN: i64 = -32005;
    /// The proxy is terminating.
    pub const SERVER_SHUTTING_DOWN: i64 = -32006;
}

/// Errors from proxy lifecycle operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The upstream child could not be spawned.
    #[error("failed to spawn upstream '{command}': {source}")]
    Spawn {
        /// The command that failed.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The child's stdio could not be captured.
    #[error("upstream child has no piped {0}")]
    MissingStdio(&'static str),

    /// A transport operation failed.
    #[error(transparent)]
    Transport(#[from] overwatch_transport::TransportError),

    /// The core is not running.
    #[error("proxy core is not running")]
    NotRunning,

    /// No server with that name is configured or running.
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// The server entry cannot be started as configured.
    #[error("server '{server}' is misconfigured: {reason}")]
    Misconfigured {
        /// The server entry.
        server: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
