//! The shared validation rule set.
//!
//! One rule set serves both the configuration loader surface and the
//! engine's reload path, so a document accepted at startup cannot be
//! rejected on reload or vice versa. Errors block activation; warnings
//! block it only in strict mode.

use std::collections::HashSet;
use std::fmt;

use crate::compile::glob_to_regex;
use crate::document::{ConfigDocument, PathRules, PolicyRule};

/// Characters forbidden inside tool patterns.
const FORBIDDEN_TOOL_PATTERN_CHARS: &[char] = &['<', '>', '"', '|', ';', '`', '$'];
/// Longest accepted tool pattern.
const MAX_TOOL_PATTERN_LEN: usize = 256;
/// Longest accepted path pattern.
const MAX_PATH_PATTERN_LEN: usize = 1024;

/// Stable machine-readable codes for validation findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::enum_variant_names)]
pub enum ValidationCode {
    /// Document version is not 1.
    InvalidVersion,
    /// `defaults.action` is not allow/prompt/deny.
    InvalidDefaultAction,
    /// A server entry has no upstream command.
    MissingCommand,
    /// A rule action is not allow/prompt/deny/smart.
    InvalidPolicyAction,
    /// A tool pattern is empty, too long, contains forbidden
    /// characters, or fails to compile.
    InvalidToolPattern,
    /// A path pattern is empty, too long, or contains NUL.
    InvalidPathPattern,
    /// The legacy analyzer field is present.
    DeprecatedAnalyzer,
    /// A rule defines no action, no paths, and no tools.
    EmptyPolicy,
    /// An allow and a deny entry cover the same stripped pattern.
    ConflictingPaths,
}

impl ValidationCode {
    /// The stable uppercase code string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidVersion => "INVALID_VERSION",
            Self::InvalidDefaultAction => "INVALID_DEFAULT_ACTION",
            Self::MissingCommand => "MISSING_COMMAND",
            Self::InvalidPolicyAction => "INVALID_POLICY_ACTION",
            Self::InvalidToolPattern => "INVALID_TOOL_PATTERN",
            Self::InvalidPathPattern => "INVALID_PATH_PATTERN",
            Self::DeprecatedAnalyzer => "DEPRECATED_ANALYZER",
            Self::EmptyPolicy => "EMPTY_POLICY",
            Self::ConflictingPaths => "CONFLICTING_PATHS",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an issue blocks activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Always blocks activation.
    Error,
    /// Blocks activation only in strict mode.
    Warning,
}

/// One validation finding.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Machine-readable code.
    pub code: ValidationCode,
    /// Error or warning.
    pub severity: IssueSeverity,
    /// Dotted path to the offending field.
    pub field: String,
    /// Human-readable detail.
    pub message: String,
}

/// Every finding from one validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// All findings, in document order.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn error(&mut self, code: ValidationCode, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            code,
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    fn warning(
        &mut self,
        code: ValidationCode,
        field: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.issues.push(ValidationIssue {
            code,
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Findings with error severity.
    #[must_use]
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .collect()
    }

    /// Findings with warning severity.
    #[must_use]
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .collect()
    }

    /// True when the document may be activated: no errors, and in
    /// strict mode no warnings either.
    #[must_use]
    pub fn is_acceptable(&self, strict: bool) -> bool {
        if strict {
            self.issues.is_empty()
        } else {
            self.errors().is_empty()
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .issues
            .iter()
            .map(|i| format!("{} at {}: {}", i.code, i.field, i.message))
            .collect();
        f.write_str(&rendered.join("; "))
    }
}

/// Validate a parsed document, collecting every finding.
#[must_use]
pub fn validate(doc: &ConfigDocument) -> ValidationReport {
    let mut report = ValidationReport::default();

    if doc.version != crate::document::SUPPORTED_VERSION {
        report.error(
            ValidationCode::InvalidVersion,
            "version",
            format!("version {} is not supported; expected 1", doc.version),
        );
    }

    if !matches!(doc.defaults.action.as_str(), "allow" | "prompt" | "deny") {
        report.error(
            ValidationCode::InvalidDefaultAction,
            "defaults.action",
            format!(
                "unsupported default action '{}'; expected one of: allow, prompt, deny",
                doc.defaults.action
            ),
        );
    }

    for (name, server) in &doc.servers {
        if server.command.as_deref().map(str::trim).unwrap_or("").is_empty() {
            report.error(
                ValidationCode::MissingCommand,
                format!("servers.{name}.command"),
                "server entry has no upstream command",
            );
        }

        for (index, rule) in server.policies.iter().enumerate() {
            validate_rule(&mut report, name, index, rule);
        }
    }

    report
}

fn validate_rule(report: &mut ValidationReport, server: &str, index: usize, rule: &PolicyRule) {
    let field_base = format!("servers.{server}.policies[{index}]");

    if let Some(action) = &rule.action
        && !matches!(action.as_str(), "allow" | "prompt" | "deny" | "smart")
    {
        report.error(
            ValidationCode::InvalidPolicyAction,
            format!("{field_base}.action"),
            format!("unsupported action '{action}'; expected allow, prompt, deny, or smart"),
        );
    }

    for pattern in rule.tools.as_slice() {
        if let Some(problem) = tool_pattern_problem(pattern) {
            report.error(
                ValidationCode::InvalidToolPattern,
                format!("{field_base}.tools"),
                format!("pattern '{pattern}': {problem}"),
            );
        }
    }

    if let Some(paths) = &rule.paths {
        for pattern in paths.allow.iter().chain(paths.deny.iter()) {
            if let Some(problem) = path_pattern_problem(pattern) {
                report.error(
                    ValidationCode::InvalidPathPattern,
                    format!("{field_base}.paths"),
                    format!("pattern '{pattern}': {problem}"),
                );
            }
        }

        let allow_stripped: HashSet<String> =
            paths.allow.iter().map(|p| strip_path_pattern(p)).collect();
        for deny in &paths.deny {
            let stripped = strip_path_pattern(deny);
            if allow_stripped.contains(&stripped) {
                report.warning(
                    ValidationCode::ConflictingPaths,
                    format!("{field_base}.paths"),
                    format!("'{stripped}' appears in both allow and deny"),
                );
            }
        }
    }

    if rule.analyzer.is_some() {
        report.warning(
            ValidationCode::DeprecatedAnalyzer,
            format!("{field_base}.analyzer"),
            "the analyzer field is deprecated and ignored",
        );
    }

    let pathless = rule.paths.as_ref().is_none_or(PathRules::is_empty);
    if rule.action.is_none() && pathless && rule.tools.is_empty() {
        report.warning(
            ValidationCode::EmptyPolicy,
            field_base,
            "rule defines no action, no paths, and no tools",
        );
    }
}

fn tool_pattern_problem(pattern: &str) -> Option<String> {
    if pattern.is_empty() {
        return Some("empty pattern".to_string());
    }
    if pattern.chars().count() > MAX_TOOL_PATTERN_LEN {
        return Some(format!("longer than {MAX_TOOL_PATTERN_LEN} characters"));
    }
    if let Some(bad) = pattern.chars().find(|c| FORBIDDEN_TOOL_PATTERN_CHARS.contains(c)) {
        return Some(format!("contains forbidden character '{bad}'"));
    }
    if regex::Regex::new(&glob_to_regex(pattern)).is_err() {
        return Some("does not compile".to_string());
    }
    None
}

fn path_pattern_problem(pattern: &str) -> Option<String> {
    if pattern.is_empty() {
        return Some("empty pattern".to_string());
    }
    if pattern.chars().count() > MAX_PATH_PATTERN_LEN {
        return Some(format!("longer than {MAX_PATH_PATTERN_LEN} characters"));
    }
    if pattern.contains('\0') {
        return Some("contains NUL".to_string());
    }
    None
}

/// Normalize a path pattern for conflict detection: trailing glob
/// suffixes and separators are stripped.
fn strip_path_pattern(pattern: &str) -> String {
    pattern
        .trim_end_matches('*')
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ConfigDocument;

    fn doc(text: &str) -> ConfigDocument {
        ConfigDocument::from_str(text).unwrap()
    }

    fn codes(report: &ValidationReport) -> Vec<ValidationCode> {
        report.issues.iter().map(|i| i.code).collect()
    }

    #[test]
    fn test_valid_document_passes() {
        let report = validate(&doc(
            r#"
version: 1
servers:
  fs:
    command: fs-server
    policies:
      - tools: ["delete_*"]
        action: deny
"#,
        ));
        assert!(report.is_acceptable(true));
    }

    #[test]
    fn test_invalid_version() {
        let report = validate(&doc("version: 2\n"));
        assert!(codes(&report).contains(&ValidationCode::InvalidVersion));
        assert!(!report.is_acceptable(false));
    }

    #[test]
    fn test_invalid_default_action() {
        let report = validate(&doc("version: 1\ndefaults:\n  action: yolo\n"));
        assert!(codes(&report).contains(&ValidationCode::InvalidDefaultAction));
    }

    #[test]
    fn test_missing_command() {
        let report = validate(&doc("version: 1\nservers:\n  fs: {}\n"));
        assert!(codes(&report).contains(&ValidationCode::MissingCommand));
    }

    #[test]
    fn test_invalid_policy_action() {
        let report = validate(&doc(
            "version: 1\nservers:\n  fs:\n    command: c\n    policies:\n      - tools: [x]\n        action: audit\n",
        ));
        assert!(codes(&report).contains(&ValidationCode::InvalidPolicyAction));
    }

    #[test]
    fn test_invalid_tool_patterns() {
        for pattern in ["\"\"", "\"a|b\"", "\"a;b\"", "\"a`b\"", "\"a$b\""] {
            let report = validate(&doc(&format!(
                "version: 1\nservers:\n  fs:\n    command: c\n    policies:\n      - tools: [{pattern}]\n        action: allow\n",
            )));
            assert!(
                codes(&report).contains(&ValidationCode::InvalidToolPattern),
                "pattern {pattern} was accepted"
            );
        }
    }

    #[test]
    fn test_overlong_tool_pattern() {
        let long = "x".repeat(257);
        let report = validate(&doc(&format!(
            "version: 1\nservers:\n  fs:\n    command: c\n    policies:\n      - tools: [\"{long}\"]\n        action: allow\n",
        )));
        assert!(codes(&report).contains(&ValidationCode::InvalidToolPattern));
    }

    #[test]
    fn test_invalid_path_pattern() {
        let report = validate(&doc(
            "version: 1\nservers:\n  fs:\n    command: c\n    policies:\n      - tools: [x]\n        paths:\n          allow: [\"\"]\n",
        ));
        assert!(codes(&report).contains(&ValidationCode::InvalidPathPattern));
    }

    #[test]
    fn test_deprecated_analyzer_is_warning() {
        let report = validate(&doc(
            "version: 1\nservers:\n  fs:\n    command: c\n    policies:\n      - tools: [x]\n        action: allow\n        analyzer: legacy\n",
        ));
        assert!(codes(&report).contains(&ValidationCode::DeprecatedAnalyzer));
        assert!(report.is_acceptable(false));
        assert!(!report.is_acceptable(true));
    }

    #[test]
    fn test_empty_policy_is_warning() {
        let report = validate(&doc(
            "version: 1\nservers:\n  fs:\n    command: c\n    policies:\n      - {}\n",
        ));
        assert!(codes(&report).contains(&ValidationCode::EmptyPolicy));
        assert!(report.is_acceptable(false));
    }

    #[test]
    fn test_conflicting_paths_warning() {
        let report = validate(&doc(
            "version: 1\nservers:\n  fs:\n    command: c\n    policies:\n      - tools: [x]\n        paths:\n          allow: [\"/tmp/*\"]\n          deny: [\"/tmp/\"]\n",
        ));
        assert!(codes(&report).contains(&ValidationCode::ConflictingPaths));
    }

    #[test]
    fn test_errors_collected_not_short_circuited() {
        let report = validate(&doc(
            "version: 3\ndefaults:\n  action: nope\nservers:\n  fs: {}\n",
        ));
        assert_eq!(report.errors().len(), 3);
    }
}
