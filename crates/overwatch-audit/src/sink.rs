//! The audit sink: id assignment, append, fan-out, query, stats, export.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::entry::{AuditDecision, AuditEntry, AuditFilters, AuditStats, NewAuditEntry};
use crate::error::{AuditError, AuditResult};
use crate::export::{self, ExportFormat};
use crate::storage::{AuditStorage, MemoryAuditStorage};

/// A tail subscriber, invoked synchronously for every appended entry.
///
/// Subscribers must not block: they run on the logging caller's path.
pub type AuditSubscriber = Box<dyn Fn(&AuditEntry) + Send + Sync>;

/// Append-only audit sink shared by all proxy cores.
pub struct AuditSink {
    storage: Box<dyn AuditStorage>,
    subscribers: Mutex<Vec<AuditSubscriber>>,
    redact_on_export: bool,
}

impl AuditSink {
    /// Create a sink over in-memory storage.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_storage(Box::new(MemoryAuditStorage::new()))
    }

    /// Create a sink over a custom storage backend.
    #[must_use]
    pub fn with_storage(storage: Box<dyn AuditStorage>) -> Self {
        Self {
            storage,
            subscribers: Mutex::new(Vec::new()),
            redact_on_export: true,
        }
    }

    /// Disable redaction of exported entries (test hook; exports scrub
    /// sensitive values by default).
    #[must_use]
    pub fn without_export_redaction(mut self) -> Self {
        self.redact_on_export = false;
        self
    }

    /// Register a tail subscriber. Subscribers are notified in
    /// registration order, synchronously, for every appended entry.
    pub fn subscribe(&self, subscriber: AuditSubscriber) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(subscriber);
        }
    }

    /// Assign a fresh id and timestamp, append, and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend rejects the append.
    pub fn log(&self, new: NewAuditEntry) -> AuditResult<AuditEntry> {
        let entry = AuditEntry {
            id: Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now(),
            server: new.server,
            tool: new.tool,
            args: new.args,
            risk_level: new.risk_level,
            decision: new.decision,
            session_id: new.session_id,
            duration_ms: new.duration_ms,
            error: new.error,
        };

        debug!(
            id = %entry.id,
            tool = %entry.tool,
            decision = %entry.decision,
            risk = %entry.risk_level,
            "audit entry recorded"
        );

        self.storage.append(entry.clone())?;

        if let Ok(subs) = self.subscribers.lock() {
            for subscriber in subs.iter() {
                subscriber(&entry);
            }
        }

        Ok(entry)
    }

    /// Entries matching `filters`, newest first, truncated to the
    /// filter's limit when one is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn query(&self, filters: &AuditFilters) -> AuditResult<Vec<AuditEntry>> {
        let mut entries = self.storage.scan(filters)?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filters.limit
            && limit > 0
        {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Aggregate statistics, optionally restricted to entries at or
    /// after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn stats(&self, since: Option<DateTime<Utc>>) -> AuditResult<AuditStats> {
        let filters = AuditFilters {
            since,
            ..AuditFilters::default()
        };
        let entries = self.storage.scan(&filters)?;

        let mut allowed = 0u64;
        let mut denied = 0u64;
        let mut by_risk_level: HashMap<String, u64> = HashMap::new();
        let mut by_server: HashMap<String, u64> = HashMap::new();
        // Tool counts keep first-seen order so ties resolve by insertion.
        let mut tool_order: Vec<String> = Vec::new();
        let mut tool_counts: HashMap<String, u64> = HashMap::new();

        for entry in &entries {
            match entry.decision {
                AuditDecision::Allowed => allowed = allowed.saturating_add(1),
                AuditDecision::Denied => denied = denied.saturating_add(1),
            }
            let count = by_risk_level
                .entry(entry.risk_level.as_str().to_string())
                .or_insert(0);
            *count = count.saturating_add(1);
            if let Some(server) = &entry.server {
                let count = by_server.entry(server.clone()).or_insert(0);
                *count = count.saturating_add(1);
            }
            if !tool_counts.contains_key(&entry.tool) {
                tool_order.push(entry.tool.clone());
            }
            let count = tool_counts.entry(entry.tool.clone()).or_insert(0);
            *count = count.saturating_add(1);
        }

        let mut top_tools: Vec<(String, u64)> = tool_order
            .into_iter()
            .map(|tool| {
                let count = tool_counts.get(&tool).copied().unwrap_or(0);
                (tool, count)
            })
            .collect();
        // Stable sort: equal counts keep first-seen order.
        top_tools.sort_by(|a, b| b.1.cmp(&a.1));
        top_tools.truncate(10);

        Ok(AuditStats {
            total: entries.len() as u64,
            allowed,
            denied,
            by_risk_level,
            by_server,
            top_tools,
        })
    }

    /// Total stored entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn count(&self) -> AuditResult<usize> {
        self.storage.count()
    }

    /// Export entries matching `filters` in the given format.
    ///
    /// Sensitive values are scrubbed through the redaction ruleset
    /// before serialization unless redaction was disabled at
    /// construction.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend or serialization fails.
    pub fn export(&self, format: ExportFormat, filters: &AuditFilters) -> AuditResult<String> {
        let mut entries = self.query(filters)?;
        if self.redact_on_export {
            let ruleset = overwatch_redact::default_ruleset();
            for entry in &mut entries {
                if let Some(args) = &entry.args {
                    entry.args = Some(overwatch_redact::redact_value(args, ruleset));
                }
                if let Some(error) = &entry.error {
                    entry.error = Some(overwatch_redact::redact_str(error, ruleset));
                }
            }
        }
        export::render(format, &entries)
    }
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("redact_on_export", &self.redact_on_export)
            .finish_non_exhaustive()
    }
}
