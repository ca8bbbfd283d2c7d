//! Overwatch Policy - the declarative access policy engine.
//!
//! The engine evaluates `(server, tool, args)` to a [`Decision`] using
//! the loading path *validate, compile, expose*: a document with any
//! validation error is never made active, and a reload swaps the
//! compiled state atomically so every evaluation sees either the old
//! set or the new set, never a mix.
//!
//! One shared validation rule set serves both the configuration loader
//! surface and the engine's reload path.
//!
//! [`Decision`]: overwatch_core::Decision

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod compile;
mod document;
mod engine;
mod error;
mod validate;

pub use compile::glob_to_regex;
pub use document::{
    AuditSection, ConfigDocument, DefaultsSection, PathRules, PolicyRule, ServerEntry,
    ShadowingSection, ToolPatterns,
};
pub use engine::{DEFAULT_RELOAD_DEBOUNCE, PolicyEngine, PolicyEvent};
pub use error::{PolicyError, PolicyResult};
pub use validate::{IssueSeverity, ValidationCode, ValidationIssue, ValidationReport, validate};
