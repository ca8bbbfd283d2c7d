//! Overwatch Audit - append-only decision trail.
//!
//! Every policy decision the proxy takes is recorded exactly once. The
//! [`AuditSink`] assigns ids and timestamps, appends through an
//! [`AuditStorage`] backend, notifies tail subscribers in insertion
//! order, and answers filtered queries, aggregate statistics, and
//! multi-format export (JSON, CSV, CEF).
//!
//! Entries are never mutated after insert.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod entry;
mod error;
mod export;
mod sink;
mod storage;

pub use entry::{AuditDecision, AuditEntry, AuditFilters, AuditStats, NewAuditEntry};
pub use error::{AuditError, AuditResult};
pub use export::ExportFormat;
pub use sink::{AuditSink, AuditSubscriber};
pub use storage::{AuditStorage, MemoryAuditStorage};
