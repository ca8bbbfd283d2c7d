//! Audit entry and query vocabulary.

use chrono::{DateTime, Utc};
use overwatch_core::RiskLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Whether a recorded call was allowed through or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditDecision {
    /// The call was forwarded to the upstream.
    Allowed,
    /// The call was rejected before reaching the upstream.
    Denied,
}

impl AuditDecision {
    /// Stable lowercase name, matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for AuditDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded decision. Append-only; never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// 128-bit random id, lowercase hex.
    pub id: String,
    /// When the decision was recorded.
    pub timestamp: DateTime<Utc>,
    /// Upstream server name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Tool that was invoked.
    pub tool: String,
    /// Invocation arguments, when captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    /// Risk classification at decision time.
    pub risk_level: RiskLevel,
    /// The decision taken.
    pub decision: AuditDecision,
    /// Session grant that authorized the call, if one did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Round-trip duration, when the call completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Error detail for failed or denied calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An entry as submitted to [`crate::AuditSink::log`], before the sink
/// assigns an id and timestamp.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    /// Upstream server name, when known.
    pub server: Option<String>,
    /// Tool that was invoked.
    pub tool: String,
    /// Invocation arguments, when captured.
    pub args: Option<Value>,
    /// Risk classification at decision time.
    pub risk_level: RiskLevel,
    /// The decision taken.
    pub decision: AuditDecision,
    /// Session grant that authorized the call, if one did.
    pub session_id: Option<String>,
    /// Round-trip duration, when the call completed.
    pub duration_ms: Option<u64>,
    /// Error detail for failed or denied calls.
    pub error: Option<String>,
}

impl NewAuditEntry {
    /// Start an entry for a tool with a decision.
    #[must_use]
    pub fn new(tool: impl Into<String>, risk_level: RiskLevel, decision: AuditDecision) -> Self {
        Self {
            server: None,
            tool: tool.into(),
            args: None,
            risk_level,
            decision,
            session_id: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Attach the server name.
    #[must_use]
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Attach the invocation arguments.
    #[must_use]
    pub fn args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    /// Attach the authorizing session grant id.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach an error detail.
    #[must_use]
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach the round-trip duration.
    #[must_use]
    pub fn duration_ms(mut self, millis: u64) -> Self {
        self.duration_ms = Some(millis);
        self
    }
}

/// Conjunctive filters for [`crate::AuditSink::query`].
#[derive(Debug, Clone, Default)]
pub struct AuditFilters {
    /// Only entries at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Only entries at or before this time.
    pub until: Option<DateTime<Utc>>,
    /// Only entries for this server.
    pub server: Option<String>,
    /// Only entries for this tool.
    pub tool: Option<String>,
    /// Only entries at this risk level.
    pub risk_level: Option<RiskLevel>,
    /// Only entries with this decision.
    pub decision: Option<AuditDecision>,
    /// At most this many entries (must be > 0 to take effect).
    pub limit: Option<usize>,
}

impl AuditFilters {
    /// True when `entry` satisfies every set filter.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(since) = self.since
            && entry.timestamp < since
        {
            return false;
        }
        if let Some(until) = self.until
            && entry.timestamp > until
        {
            return false;
        }
        if let Some(server) = &self.server
            && entry.server.as_deref() != Some(server.as_str())
        {
            return false;
        }
        if let Some(tool) = &self.tool
            && entry.tool != *tool
        {
            return false;
        }
        if let Some(risk) = self.risk_level
            && entry.risk_level != risk
        {
            return false;
        }
        if let Some(decision) = self.decision
            && entry.decision != decision
        {
            return false;
        }
        true
    }
}

/// Aggregate statistics over the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    /// Total entries considered.
    pub total: u64,
    /// Entries with decision `allowed`.
    pub allowed: u64,
    /// Entries with decision `denied`.
    pub denied: u64,
    /// Entry counts keyed by risk level name.
    pub by_risk_level: HashMap<String, u64>,
    /// Entry counts keyed by server name.
    pub by_server: HashMap<String, u64>,
    /// Top 10 tool names by count, ties broken by insertion order.
    pub top_tools: Vec<(String, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(tool: &str, decision: AuditDecision) -> AuditEntry {
        AuditEntry {
            id: "00".repeat(16),
            timestamp: Utc::now(),
            server: Some("fs".to_string()),
            tool: tool.to_string(),
            args: Some(json!({"path": "/tmp/x"})),
            risk_level: RiskLevel::Write,
            decision,
            session_id: None,
            duration_ms: None,
            error: None,
        }
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let e = entry("write_file", AuditDecision::Allowed);

        let mut f = AuditFilters::default();
        assert!(f.matches(&e));

        f.server = Some("fs".to_string());
        f.decision = Some(AuditDecision::Allowed);
        assert!(f.matches(&e));

        f.decision = Some(AuditDecision::Denied);
        assert!(!f.matches(&e));
    }

    #[test]
    fn test_time_window_filters() {
        let e = entry("read_file", AuditDecision::Allowed);
        let earlier = e.timestamp - chrono::Duration::seconds(10);
        let later = e.timestamp + chrono::Duration::seconds(10);

        let f = AuditFilters {
            since: Some(earlier),
            until: Some(later),
            ..AuditFilters::default()
        };
        assert!(f.matches(&e));

        let f = AuditFilters {
            since: Some(later),
            ..AuditFilters::default()
        };
        assert!(!f.matches(&e));
    }

    #[test]
    fn test_builder_chain() {
        let new = NewAuditEntry::new("delete_file", RiskLevel::Destructive, AuditDecision::Denied)
            .server("fs")
            .error("denied by rule");
        assert_eq!(new.tool, "delete_file");
        assert_eq!(new.server.as_deref(), Some("fs"));
        assert_eq!(new.error.as_deref(), Some("denied by rule"));
    }
}
