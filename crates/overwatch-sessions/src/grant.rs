//! Grant types and matching rules.

use chrono::{DateTime, Duration, Utc};
use overwatch_core::RiskLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::SessionError;

/// What a grant's pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantScope {
    /// Pattern must equal the tool name exactly.
    Exact,
    /// Pattern is a `*`-glob over the tool name.
    Tool,
    /// Grant covers every tool on the grant's server (or every server
    /// when no server constraint is stored).
    Server,
}

impl GrantScope {
    /// Stable lowercase name, matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Tool => "tool",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for GrantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a grant remains valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantDuration {
    /// One second: effectively single-use.
    Once,
    /// Five minutes.
    FiveMin,
    /// Fifteen minutes.
    FifteenMin,
    /// The rest of the session, capped at 24 hours.
    Session,
    /// An explicit span in milliseconds.
    Millis(u64),
}

impl GrantDuration {
    /// The wall-clock span this duration maps to.
    #[must_use]
    pub fn as_chrono(self) -> Duration {
        match self {
            Self::Once => Duration::seconds(1),
            Self::FiveMin => Duration::minutes(5),
            Self::FifteenMin => Duration::minutes(15),
            Self::Session => Duration::hours(24),
            Self::Millis(ms) => {
                Duration::try_milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
                    .unwrap_or(Duration::MAX)
            },
        }
    }
}

impl std::str::FromStr for GrantDuration {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(Self::Once),
            "5min" => Ok(Self::FiveMin),
            "15min" => Ok(Self::FifteenMin),
            "session" => Ok(Self::Session),
            other => other
                .parse::<u64>()
                .map(Self::Millis)
                .map_err(|_| SessionError::InvalidDuration(other.to_string())),
        }
    }
}

/// Approval metadata attached to a grant when any of it was supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantAuditInfo {
    /// Who approved the original call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    /// Tool name from the approved call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Arguments from the approved call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<Value>,
    /// Risk level the approved call carried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    /// Reason supplied with the approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Where the approval came from (terminal, webhook, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Revocation stamp; present once a grant has been revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    /// When the grant was revoked.
    pub revoked_at: DateTime<Utc>,
    /// Who revoked it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_by: Option<String>,
    /// Why it was revoked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A time-bounded approval that short-circuits future prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionGrant {
    /// 128-bit random id, lowercase hex.
    pub id: String,
    /// Matching scope.
    pub scope: GrantScope,
    /// Tool name or glob, depending on scope.
    pub pattern: String,
    /// Server constraint; `None` matches any server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time; always after `created_at`.
    pub expires_at: DateTime<Utc>,
    /// Successful matches recorded against this grant. Monotonic; only
    /// mutated by a match.
    pub use_count: u64,
    /// When the grant last matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Approval metadata, when any was supplied at creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<GrantAuditInfo>,
    /// Revocation stamp, once revoked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation: Option<Revocation>,
}

impl SessionGrant {
    /// A grant is active iff it has not expired and not been revoked.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at && self.revocation.is_none()
    }

    /// A grant is expired iff `now` has reached its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this grant covers an invocation of `tool` on `server`.
    ///
    /// A stored server constraint must equal the request's server; a
    /// request without a server never satisfies a constrained grant.
    #[must_use]
    pub fn matches(&self, tool: &str, server: Option<&str>) -> bool {
        if let Some(constraint) = &self.server
            && server != Some(constraint.as_str())
        {
            return false;
        }
        match self.scope {
            GrantScope::Exact => self.pattern == tool,
            GrantScope::Tool => glob_matches(&self.pattern, tool),
            GrantScope::Server => true,
        }
    }
}

/// The grant glob dialect: bare `*` matches everything; a leading or
/// trailing `*` matches suffix or prefix; otherwise exact equality.
fn glob_matches(pattern: &str, tool: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(rest), Some(_)) => {
            // Both ends wild: containment on the middle.
            let middle = rest.strip_suffix('*').unwrap_or(rest);
            tool.contains(middle)
        },
        (Some(suffix), None) => tool.ends_with(suffix),
        (None, Some(prefix)) => tool.starts_with(prefix),
        (None, None) => pattern == tool,
    }
}
