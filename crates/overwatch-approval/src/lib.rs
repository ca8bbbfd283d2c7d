//! Overwatch Approval - the out-of-band approval contract.
//!
//! High-risk tool calls gate on an [`ApprovalHandler`]: the proxy sends
//! an [`ApprovalRequest`] and acts on the returned decision. The crate
//! ships the [`WebhookApprover`] (HTTP POST with optional HMAC-SHA256
//! signing, overall timeout, exponential backoff, fail-closed) plus the
//! signature verification helpers a receiving service uses; interactive
//! terminal approvers live outside the core.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod handler;
mod signature;
mod webhook;

pub use error::{ApprovalError, ApprovalResult};
pub use handler::{
    ApprovalHandler, ApprovalRequest, ApprovalResponse, SessionDuration, StaticApprover,
};
pub use signature::{
    SIGNATURE_HEADER, SignatureCheck, SignatureFailure, signature_header, sign_body,
    verify_signature, verify_signature_detailed,
};
pub use webhook::{RetryPolicy, WebhookApprover};
