//! Overwatch Redact - credential and PII scrubbing.
//!
//! Pure functions over strings and structured values. A [`Ruleset`] is a
//! list of labelled regexes spanning three families: provider-specific
//! credentials, personally identifiable data, and generic secrets.
//! Matches are replaced with a literal `[REDACTED]` token; k=v-style
//! generic matches keep the key and delimiter and replace only the value.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod rules;
mod scrub;

pub use rules::{RedactionRule, Ruleset, default_ruleset};
pub use scrub::{contains_sensitive, redact_str, redact_value};

/// The literal token substituted for matched secrets.
pub const REDACTED: &str = "[REDACTED]";
