//! Overwatch Core - shared vocabulary for the security proxy.
//!
//! This crate holds the types every other Overwatch crate speaks:
//! - [`RiskLevel`] - coarse severity classification for tool calls
//! - [`PolicyAction`] and [`Decision`] - the outcome of a policy evaluation
//! - [`FailMode`] - the proxy's posture when policy or upstream is unreachable
//! - [`env_policy`] - the spawn-environment sanitization blocklist
//!
//! It deliberately has no async, no I/O, and no internal dependencies.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod env_policy;

mod decision;
mod risk;

pub use decision::{Decision, FailMode, PolicyAction};
pub use risk::RiskLevel;
