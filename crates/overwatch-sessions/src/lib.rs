//! Overwatch Sessions - the approval grant cache.
//!
//! A [`SessionGrant`] remembers a prior approval so matching future
//! invocations skip the prompt. Grants are scoped (exact tool, tool
//! glob, or whole server), time-bounded, revocable, and usage-tracked.
//!
//! The [`SessionCache`] matches invocations against active grants
//! (most recent first, first match wins), creates grants from approval
//! outcomes, revokes individually or in bulk, and prunes expired grants
//! lazily plus on a background tick that holds only a weak reference -
//! it can never keep the process alive.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod cache;
mod error;
mod grant;
mod store;

pub use cache::{DEFAULT_CLEANUP_INTERVAL, CreateGrantOptions, SessionCache, SessionStats};
pub use error::{SessionError, SessionResult};
pub use grant::{GrantAuditInfo, GrantDuration, GrantScope, Revocation, SessionGrant};
pub use store::{GrantStore, MemoryGrantStore};
