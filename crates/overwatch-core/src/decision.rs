//! Policy decision vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::risk::RiskLevel;

/// The action a policy evaluation resolved to.
///
/// Rules may additionally be declared `smart` in configuration; `smart`
/// always resolves to one of these three before a decision is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// Forward the call to the upstream server.
    Allow,
    /// Require an out-of-band approval before forwarding.
    Prompt,
    /// Reject the call without contacting the upstream.
    Deny,
}

impl PolicyAction {
    /// Stable lowercase name, matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Prompt => "prompt",
            Self::Deny => "deny",
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one tool invocation against the active policy set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// What the proxy should do with the call.
    pub action: PolicyAction,
    /// Risk classification backing the action.
    pub risk_level: RiskLevel,
    /// Human-readable explanation, surfaced in denials and audit entries.
    pub reason: String,
    /// Description of the rule that matched, if any rule did.
    pub matched_rule: Option<String>,
}

impl Decision {
    /// Build a decision with no matched rule.
    #[must_use]
    pub fn new(action: PolicyAction, risk_level: RiskLevel, reason: impl Into<String>) -> Self {
        Self {
            action,
            risk_level,
            reason: reason.into(),
            matched_rule: None,
        }
    }

    /// Attach the matched rule description.
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.matched_rule = Some(rule.into());
        self
    }
}

/// The proxy's posture when policy or the upstream cannot be consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Allow calls to proceed best-effort.
    Open,
    /// Deny calls outright.
    #[default]
    Closed,
    /// Signalled via events; enforcement is left to policy rules.
    Readonly,
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
            Self::Readonly => f.write_str("readonly"),
        }
    }
}
