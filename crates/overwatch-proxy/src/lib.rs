//! Overwatch Proxy - the per-server security proxy core.
//!
//! One [`ProxyCore`] per upstream server: it owns the client transport,
//! spawns and owns the upstream child process (with a sanitized
//! environment), and drives everything on a single task so all state
//! transitions are serialized between I/O readiness events. Tool calls
//! pass through policy, the session grant cache, and the approval
//! handler before reaching the upstream; every decision is audited
//! exactly once before the corresponding reply leaves the proxy.
//!
//! The [`Orchestrator`] runs N cores from one configuration document,
//! sharing a single policy engine, session cache, audit sink, and
//! shadowing detector.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod breaker;
mod config;
mod core;
mod error;
mod events;
mod orchestrator;
mod stats;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use config::{ProxyConfig, RecoveryConfig};
pub use error::{ProxyError, ProxyResult, codes};
pub use self::core::ProxyCore;
pub use events::{Direction, ProxyEvent};
pub use orchestrator::{ClientIo, Orchestrator, OrchestratorStats};
pub use stats::ProxyStatsSnapshot;
