//! Typed proxy events fanned out to subscribers.
//!
//! Subscribers receive events over a broadcast channel; their handling
//! never reenters the proxy state machine.

use overwatch_shadowing::ShadowingFinding;

/// Which way a message was travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to upstream.
    ClientToUpstream,
    /// Upstream to client.
    UpstreamToClient,
}

/// Observable proxy-core happenings.
#[derive(Debug, Clone)]
pub enum ProxyEvent {
    /// A message exceeded the configured size limit.
    MessageTooLarge {
        /// Travel direction of the oversized message.
        direction: Direction,
        /// Serialized size in bytes.
        size: usize,
    },
    /// Fail mode is `readonly` and an enforcement point was hit.
    FailModeWarning {
        /// What happened.
        reason: String,
    },
    /// The shadowing detector raised a finding.
    Shadowing {
        /// The finding.
        finding: ShadowingFinding,
    },
    /// The upstream child exited or its stream closed.
    UpstreamClosed,
    /// A recovery attempt is starting after its backoff.
    RecoveryAttempt {
        /// 1-based attempt number.
        attempt: u32,
        /// Backoff applied before this attempt, in milliseconds.
        delay_ms: u64,
    },
    /// The upstream was restarted.
    RecoverySuccess {
        /// The attempt that succeeded.
        attempt: u32,
    },
    /// One recovery attempt failed.
    RecoveryError {
        /// The attempt that failed.
        attempt: u32,
        /// Why it failed.
        error: String,
    },
    /// Every recovery attempt failed.
    RecoveryFailed {
        /// How many attempts were made.
        attempts: u32,
    },
    /// Graceful shutdown has begun.
    ShuttingDown,
}
