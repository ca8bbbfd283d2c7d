//! Per-core request counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared mutable counters, updated by the driver task.
#[derive(Debug, Default)]
pub(crate) struct ProxyStats {
    pub(crate) requests_total: AtomicU64,
    pub(crate) requests_failed: AtomicU64,
    pub(crate) requests_timed_out: AtomicU64,
    pub(crate) denials: AtomicU64,
    pub(crate) approvals: AtomicU64,
}

impl ProxyStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ProxyStatsSnapshot {
        ProxyStatsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            denials: self.denials.load(Ordering::Relaxed),
            approvals: self.approvals.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProxyStatsSnapshot {
    /// Client messages that passed the size and breaker gates.
    pub requests_total: u64,
    /// Upstream failures observed.
    pub requests_failed: u64,
    /// Requests reaped by either timeout layer.
    pub requests_timed_out: u64,
    /// Tool calls denied by policy or approval.
    pub denials: u64,
    /// Tool calls that passed an approval gate.
    pub approvals: u64,
}
