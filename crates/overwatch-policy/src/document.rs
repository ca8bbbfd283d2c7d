//! The declarative configuration document.
//!
//! Action fields stay as plain strings at this layer so the validator
//! can report bad values with stable codes instead of opaque parse
//! failures; compilation turns them into typed actions after validation
//! has passed. Unknown fields are reserved and ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::error::{PolicyError, PolicyResult};

/// The supported document version.
pub const SUPPORTED_VERSION: i64 = 1;

/// Root of the configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// Document version; must equal [`SUPPORTED_VERSION`].
    #[serde(default)]
    pub version: i64,
    /// Proxy-wide defaults.
    #[serde(default)]
    pub defaults: DefaultsSection,
    /// Upstream servers by name.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerEntry>,
    /// Audit trail settings.
    #[serde(default)]
    pub audit: AuditSection,
    /// Shadowing detector settings.
    #[serde(default)]
    pub tool_shadowing: ShadowingSection,
}

impl ConfigDocument {
    /// Parse a document from YAML (JSON parses too, being a YAML
    /// subset).
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Parse`] when the text is not a valid
    /// document shape. Semantic problems are the validator's job.
    pub fn from_str(text: &str) -> PolicyResult<Self> {
        serde_yaml::from_str(text).map_err(|e| PolicyError::Parse(e.to_string()))
    }
}

/// Proxy-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsSection {
    /// Action when no rule decides: allow, prompt, or deny.
    #[serde(default = "default_action")]
    pub action: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Lifetime of grants created from approvals, in milliseconds.
    #[serde(default = "default_session_duration_ms")]
    pub session_duration_ms: u64,
}

fn default_action() -> String {
    "prompt".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_session_duration_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            action: default_action(),
            timeout_ms: default_timeout_ms(),
            session_duration_ms: default_session_duration_ms(),
        }
    }
}

/// One upstream server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Executable to spawn.
    pub command: Option<String>,
    /// Arguments for the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Operator-supplied environment overrides, merged in unfiltered
    /// after sanitization.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Access rules, evaluated in declaration order.
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
}

/// Tool patterns: a single glob or a list of globs. An empty list makes
/// the rule *global* (it matches every tool).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolPatterns {
    /// One glob.
    One(String),
    /// Several globs.
    Many(Vec<String>),
}

impl Default for ToolPatterns {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl ToolPatterns {
    /// The patterns as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::One(p) => std::slice::from_ref(p),
            Self::Many(ps) => ps,
        }
    }

    /// True when no pattern is given (a global rule).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// Path allow/deny lists inside a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathRules {
    /// Path globs that allow the call outright.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Path globs that deny the call outright. Checked before allow.
    #[serde(default)]
    pub deny: Vec<String>,
}

impl PathRules {
    /// True when both lists are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

/// One declarative access rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Which tools this rule covers; empty means every tool.
    #[serde(default)]
    pub tools: ToolPatterns,
    /// allow, prompt, deny, or smart; absent behaves like smart.
    pub action: Option<String>,
    /// Path-based allow/deny lists.
    pub paths: Option<PathRules>,
    /// Legacy analyzer hook; parsed only so the validator can warn on
    /// it.
    pub analyzer: Option<Value>,
}

impl PolicyRule {
    /// Short human-readable summary used as `matched_rule` in
    /// decisions.
    #[must_use]
    pub fn describe(&self) -> String {
        let tools = if self.tools.is_empty() {
            "*".to_string()
        } else {
            self.tools.as_slice().join(", ")
        };
        let action = self.action.as_deref().unwrap_or("smart");
        format!("tools [{tools}] -> {action}")
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSection {
    /// Whether auditing is on.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Storage path for a persistent backend.
    pub path: Option<String>,
    /// Whether exports scrub credentials and PII.
    #[serde(default = "default_true")]
    pub redact_pii: bool,
    /// Maximum retained entries.
    pub retention: Option<usize>,
}

/// Shadowing detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowingSection {
    /// Whether the detector runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether descriptions are scanned for injection payloads.
    #[serde(default = "default_true")]
    pub check_descriptions: bool,
    /// Whether mid-session mutations are detected.
    #[serde(default = "default_true")]
    pub detect_mutations: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            redact_pii: true,
            retention: None,
        }
    }
}

impl Default for ShadowingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            check_descriptions: true,
            detect_mutations: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_document() {
        let doc = ConfigDocument::from_str(
            r#"
version: 1
defaults:
  action: prompt
servers:
  fs:
    command: fs-server
    policies:
      - tools: ["delete_*"]
        action: deny
      - tools: write_file
        paths:
          allow: ["/tmp/*"]
          deny: ["/etc/*"]
"#,
        )
        .unwrap();
        assert_eq!(doc.version, 1);
        let fs = &doc.servers["fs"];
        assert_eq!(fs.command.as_deref(), Some("fs-server"));
        assert_eq!(fs.policies.len(), 2);
        assert_eq!(fs.policies[0].tools.as_slice(), ["delete_*"]);
        assert_eq!(fs.policies[1].tools.as_slice(), ["write_file"]);
    }

    #[test]
    fn test_parse_json_document() {
        let doc = ConfigDocument::from_str(
            r#"{"version": 1, "servers": {"web": {"command": "web-server"}}}"#,
        )
        .unwrap();
        assert!(doc.servers.contains_key("web"));
    }

    #[test]
    fn test_unknown_fields_are_reserved_not_fatal() {
        let doc = ConfigDocument::from_str("version: 1\nfuture_section:\n  x: 1\n").unwrap();
        assert_eq!(doc.version, 1);
    }

    #[test]
    fn test_defaults() {
        let doc = ConfigDocument::from_str("version: 1\n").unwrap();
        assert_eq!(doc.defaults.action, "prompt");
        assert_eq!(doc.defaults.timeout_ms, 30_000);
        assert!(doc.audit.enabled);
        assert!(doc.audit.redact_pii);
        assert!(doc.tool_shadowing.detect_mutations);
    }

    #[test]
    fn test_rule_describe() {
        let rule = PolicyRule {
            tools: ToolPatterns::Many(vec!["delete_*".to_string()]),
            action: Some("deny".to_string()),
            ..PolicyRule::default()
        };
        assert_eq!(rule.describe(), "tools [delete_*] -> deny");
    }
}
