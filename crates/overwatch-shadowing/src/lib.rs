//! Overwatch Shadowing - detection of tool shadowing attacks.
//!
//! *Tool shadowing* is the class of attacks where two upstream servers
//! expose the same tool name with different behavior or schema, letting
//! one impersonate the other. This crate provides:
//!
//! - Canonical SHA-256 fingerprinting of tool descriptors
//! - Collision detection across servers (benign shared tools vs
//!   conflicting definitions)
//! - Mid-session mutation detection (definition changed after
//!   registration, or a tool appeared that was never registered)
//! - A description scanner that hunts prompt-injection payloads under
//!   aggressive Unicode normalization
//!
//! All operations are synchronous; the [`ShadowingDetector`] is shared
//! across proxy cores behind an `Arc`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod descriptor;
mod detector;
mod hashing;
mod report;
mod scanner;

pub use descriptor::{MAX_DESCRIPTION_LEN, MAX_NAME_LEN, MAX_SCHEMA_DEPTH, ToolDescriptor};
pub use detector::{DetectorConfig, DetectorMetricsSnapshot, ShadowingDetector, ToolFingerprint};
pub use hashing::{ToolHashes, canonical_json, hash_tool, sha256_hex};
pub use report::{
    FindingKind, RecommendedAction, ServerShadowingReport, Severity, ShadowingFinding,
};
pub use scanner::{DescriptionScan, normalize_description, scan_description};
