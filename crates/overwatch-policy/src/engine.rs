//! The policy engine: compiled state, evaluation, and hot reload.

use notify::{RecursiveMode, Watcher};
use overwatch_core::{Decision, PolicyAction, RiskLevel};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::compile::PatternCache;
use crate::document::{ConfigDocument, PolicyRule};
use crate::error::{PolicyError, PolicyResult};
use crate::validate::{ValidationReport, validate};

/// Argument keys treated as filesystem paths during evaluation.
const PATH_KEYS: &[&str] = &["path", "file", "filename", "filepath", "directory", "dir"];

/// Default debounce window for the file watcher.
pub const DEFAULT_RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// Reload outcomes emitted to subscribers.
#[derive(Debug, Clone)]
pub enum PolicyEvent {
    /// A new set was validated, compiled, and swapped in.
    Reloaded {
        /// Number of warnings the accepted document carried.
        warnings: usize,
    },
    /// The candidate set was rejected; the previous set stays active.
    ReloadFailed {
        /// Why the reload was rejected.
        error: String,
    },
}

enum RuleAction {
    Allow,
    Prompt,
    Deny,
    Smart,
}

struct CompiledRule {
    description: String,
    tool_patterns: Vec<Regex>,
    action: RuleAction,
    path_allow: Vec<Regex>,
    path_deny: Vec<Regex>,
}

impl CompiledRule {
    fn covers(&self, tool: &str) -> bool {
        self.tool_patterns.is_empty() || self.tool_patterns.iter().any(|re| re.is_match(tool))
    }
}

struct CompiledPolicy {
    default_action: PolicyAction,
    servers: HashMap<String, Vec<CompiledRule>>,
}

impl CompiledPolicy {
    fn empty() -> Self {
        Self {
            default_action: PolicyAction::Prompt,
            servers: HashMap::new(),
        }
    }
}

/// The shared policy engine. One instance serves every proxy core.
pub struct PolicyEngine {
    active: RwLock<Arc<CompiledPolicy>>,
    strict: bool,
    cache: PatternCache,
    events: broadcast::Sender<PolicyEvent>,
    watcher: StdMutex<Option<notify::RecommendedWatcher>>,
}

impl PolicyEngine {
    /// Create an engine with an empty policy set (default action
    /// prompt). `strict` makes validation warnings block activation.
    #[must_use]
    pub fn new(strict: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            active: RwLock::new(Arc::new(CompiledPolicy::empty())),
            strict,
            cache: PatternCache::new(),
            events,
            watcher: StdMutex::new(None),
        }
    }

    /// Validate, compile, and atomically activate a document.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Validation`] when the document is not
    /// acceptable (any error, or any warning in strict mode); the
    /// previous set stays active. Returns [`PolicyError::Parse`] when a
    /// pattern fails to compile.
    pub fn load(&self, doc: &ConfigDocument) -> PolicyResult<ValidationReport> {
        let report = validate(doc);
        if !report.is_acceptable(self.strict) {
            return Err(PolicyError::Validation(report));
        }

        let compiled = self.compile(doc)?;
        if let Ok(mut active) = self.active.write() {
            *active = Arc::new(compiled);
        }
        info!(
            servers = doc.servers.len(),
            warnings = report.warnings().len(),
            "policy set activated"
        );
        Ok(report)
    }

    fn compile(&self, doc: &ConfigDocument) -> PolicyResult<CompiledPolicy> {
        let default_action = match doc.defaults.action.as_str() {
            "allow" => PolicyAction::Allow,
            "deny" => PolicyAction::Deny,
            _ => PolicyAction::Prompt,
        };

        let mut servers = HashMap::new();
        for (name, entry) in &doc.servers {
            let mut rules = Vec::with_capacity(entry.policies.len());
            for rule in &entry.policies {
                rules.push(self.compile_rule(rule)?);
            }
            servers.insert(name.clone(), rules);
        }

        Ok(CompiledPolicy {
            default_action,
            servers,
        })
    }

    fn compile_rule(&self, rule: &PolicyRule) -> PolicyResult<CompiledRule> {
        let tool_patterns = self.compile_globs(rule.tools.as_slice(), "tool")?;

        let action = match rule.action.as_deref() {
            Some("allow") => RuleAction::Allow,
            Some("prompt") => RuleAction::Prompt,
            Some("deny") => RuleAction::Deny,
            _ => RuleAction::Smart,
        };

        // Path patterns share the tool-pattern translation: `*` spans
        // separators, so `/etc/*` covers everything under `/etc`.
        let (path_allow, path_deny) = match &rule.paths {
            Some(paths) => (
                self.compile_globs(&paths.allow, "path")?,
                self.compile_globs(&paths.deny, "path")?,
            ),
            None => (Vec::new(), Vec::new()),
        };

        Ok(CompiledRule {
            description: rule.describe(),
            tool_patterns,
            action,
            path_allow,
            path_deny,
        })
    }

    fn compile_globs(&self, patterns: &[String], kind: &str) -> PolicyResult<Vec<Regex>> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let regex = self
                .cache
                .compile(pattern)
                .map_err(|e| PolicyError::Parse(format!("{kind} pattern '{pattern}': {e}")))?;
            compiled.push(regex);
        }
        Ok(compiled)
    }

    /// Evaluate one invocation against the active set.
    ///
    /// Rules run in declaration order. A matching rule first tests a
    /// path-typed argument against its deny list, then its allow list;
    /// a static action decides next; smart rules fall through. When no
    /// rule decides, risk inference by tool name runs, and finally the
    /// default action.
    #[must_use]
    pub fn evaluate(&self, server: &str, tool: &str, args: Option<&Value>) -> Decision {
        let policy = match self.active.read() {
            Ok(active) => Arc::clone(&*active),
            Err(_) => return Decision::new(PolicyAction::Deny, RiskLevel::Write, "policy lock poisoned"),
        };

        if let Some(rules) = policy.servers.get(server) {
            for rule in rules {
                if !rule.covers(tool) {
                    continue;
                }

                if let Some(path) = path_argument(args) {
                    if rule.path_deny.iter().any(|re| re.is_match(path)) {
                        debug!(server, tool, path, "path denied by rule");
                        return Decision::new(PolicyAction::Deny, RiskLevel::Dangerous, "deny path")
                            .with_rule(rule.description.clone());
                    }
                    if rule.path_allow.iter().any(|re| re.is_match(path)) {
                        debug!(server, tool, path, "path allowed by rule");
                        return Decision::new(PolicyAction::Allow, RiskLevel::Safe, "allow path")
                            .with_rule(rule.description.clone());
                    }
                }

                match rule.action {
                    RuleAction::Allow => {
                        return Decision::new(PolicyAction::Allow, RiskLevel::Write, "matched rule")
                            .with_rule(rule.description.clone());
                    },
                    RuleAction::Prompt => {
                        return Decision::new(PolicyAction::Prompt, RiskLevel::Write, "matched rule")
                            .with_rule(rule.description.clone());
                    },
                    RuleAction::Deny => {
                        return Decision::new(PolicyAction::Deny, RiskLevel::Write, "matched rule")
                            .with_rule(rule.description.clone());
                    },
                    RuleAction::Smart => {},
                }
            }
        }

        infer_by_name(tool, policy.default_action)
    }

    /// Synchronous reload from document text.
    ///
    /// # Errors
    ///
    /// Returns parse or validation errors; the previous set stays
    /// active on failure.
    pub fn reload_from_str(&self, text: &str) -> PolicyResult<ValidationReport> {
        let doc = ConfigDocument::from_str(text)?;
        self.load(&doc)
    }

    /// Synchronous reload from a file.
    ///
    /// # Errors
    ///
    /// Returns I/O, parse, or validation errors; the previous set stays
    /// active on failure.
    pub fn reload_from_path(&self, path: &Path) -> PolicyResult<ValidationReport> {
        let text = std::fs::read_to_string(path)?;
        self.reload_from_str(&text)
    }

    /// Subscribe to reload outcomes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PolicyEvent> {
        self.events.subscribe()
    }

    /// Watch a policy file and reload on change, debounced.
    ///
    /// The watcher lives inside the engine and stops when the engine is
    /// dropped; the debounce task holds only a weak reference, so
    /// neither can keep the process alive.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Watch`] when the watcher cannot be
    /// installed.
    pub fn watch(engine: &Arc<Self>, path: PathBuf, debounce: Duration) -> PolicyResult<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = tx.send(());
                },
                Ok(_) => {},
                Err(e) => warn!(error = %e, "policy watcher error"),
            }
        })
        .map_err(|e| PolicyError::Watch(e.to_string()))?;

        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .map_err(|e| PolicyError::Watch(e.to_string()))?;

        if let Ok(mut slot) = engine.watcher.lock() {
            *slot = Some(watcher);
        }

        let weak: Weak<Self> = Arc::downgrade(engine);
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Debounce: absorb the burst of events one save emits.
                tokio::time::sleep(debounce).await;
                while rx.try_recv().is_ok() {}

                let Some(engine) = weak.upgrade() else {
                    break;
                };
                match engine.reload_from_path(&path) {
                    Ok(report) => {
                        let _ = engine.events.send(PolicyEvent::Reloaded {
                            warnings: report.warnings().len(),
                        });
                    },
                    Err(e) => {
                        warn!(error = %e, "policy reload rejected, previous set retained");
                        let _ = engine.events.send(PolicyEvent::ReloadFailed {
                            error: e.to_string(),
                        });
                    },
                }
            }
        });

        Ok(())
    }
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

/// The first path-typed argument value, in key priority order.
fn path_argument(args: Option<&Value>) -> Option<&str> {
    let map = args?.as_object()?;
    PATH_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
}

/// Risk inference from the lowercased tool name.
fn infer_by_name(tool: &str, default_action: PolicyAction) -> Decision {
    const DESTRUCTIVE: &[&str] = &["delete", "remove", "drop", "truncate"];
    const WRITE: &[&str] = &["write", "create", "update", "insert", "modify", "set"];
    const READ: &[&str] = &["read", "get", "list", "search", "find", "query"];

    let lower = tool.to_lowercase();
    if DESTRUCTIVE.iter().any(|kw| lower.contains(kw)) {
        return Decision::new(
            PolicyAction::Prompt,
            RiskLevel::Destructive,
            "name suggests a destructive operation",
        );
    }
    if WRITE.iter().any(|kw| lower.contains(kw)) {
        return Decision::new(
            PolicyAction::Prompt,
            RiskLevel::Write,
            "name suggests a write operation",
        );
    }
    if READ.iter().any(|kw| lower.contains(kw)) {
        return Decision::new(
            PolicyAction::Allow,
            RiskLevel::Read,
            "name suggests a read operation",
        );
    }
    Decision::new(default_action, RiskLevel::Write, "default action")
}
