//! Shadowing report vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How bad a finding is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; no action needed.
    Low,
    /// Worth surfacing.
    Medium,
    /// Likely hostile.
    High,
    /// Active attack indicator.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Medium => f.write_str("medium"),
            Self::High => f.write_str("high"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// What the proxy should do about a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    /// Proceed.
    Allow,
    /// Require approval.
    Prompt,
    /// Block.
    Deny,
}

/// Kind-specific detail of a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FindingKind {
    /// The same tool name is exposed by multiple servers.
    Collision {
        /// Tool name in collision.
        tool: String,
        /// Every server exposing it, sorted.
        servers: Vec<String>,
        /// True when every definition hashes identically.
        identical: bool,
    },
    /// A tool definition changed after registration, or a tool appeared
    /// mid-session that was never registered.
    Mutation {
        /// Server the tool belongs to.
        server: String,
        /// Tool name.
        tool: String,
        /// Combined hash at registration time; `None` for a tool never
        /// seen before on this server.
        previous_hash: Option<String>,
        /// Combined hash observed now.
        current_hash: String,
        /// True when the tool was never registered on this server.
        new_tool: bool,
    },
    /// The description matched prompt-injection patterns.
    SuspiciousDescription {
        /// Tool name.
        tool: String,
        /// Tags of every pattern that hit.
        pattern_tags: Vec<String>,
    },
    /// The descriptor failed structural validation and was rejected.
    MalformedDescriptor {
        /// Why validation rejected it.
        reason: String,
    },
}

/// One detection, with severity and a recommended action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowingFinding {
    /// Kind-specific detail.
    #[serde(flatten)]
    pub kind: FindingKind,
    /// How bad it is.
    pub severity: Severity,
    /// What the proxy should do.
    pub recommended_action: RecommendedAction,
    /// Human-readable summary.
    pub message: String,
}

/// Aggregate result of registering one server's tool list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerShadowingReport {
    /// The server whose tools were registered.
    pub server: String,
    /// How many descriptors entered the registry.
    pub tools_registered: usize,
    /// Every finding raised during registration.
    pub findings: Vec<ShadowingFinding>,
    /// True when the per-server registration rate limit suppressed the
    /// checks entirely.
    pub rate_limited: bool,
}

impl ServerShadowingReport {
    /// The worst severity among findings, if any.
    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    /// True when any finding is [`Severity::Critical`].
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.max_severity() == Some(Severity::Critical)
    }

    /// Findings of the collision kind.
    #[must_use]
    pub fn collisions(&self) -> Vec<&ShadowingFinding> {
        self.findings
            .iter()
            .filter(|f| matches!(f.kind, FindingKind::Collision { .. }))
            .collect()
    }
}
