//! Lifecycle of N proxy cores from one configuration document.
//!
//! The orchestrator constructs the shared singletons - policy engine,
//! session cache, audit sink, shadowing detector - and passes them to
//! every core by reference; nothing reads ambient globals.

use futures::future::join_all;
use overwatch_approval::ApprovalHandler;
use overwatch_audit::{AuditSink, MemoryAuditStorage};
use overwatch_core::FailMode;
use overwatch_policy::{ConfigDocument, PolicyEngine, ValidationReport};
use overwatch_sessions::SessionCache;
use overwatch_shadowing::{DetectorConfig, DetectorMetricsSnapshot, ShadowingDetector};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::ProxyConfig;
use crate::core::ProxyCore;
use crate::error::{ProxyError, ProxyResult};
use crate::stats::ProxyStatsSnapshot;

/// A client-side byte stream pair for one proxy core.
pub type ClientIo = (
    Box<dyn AsyncRead + Send + Unpin>,
    Box<dyn AsyncWrite + Send + Unpin>,
);

/// Aggregated statistics over every running core.
#[derive(Debug, Clone)]
pub struct OrchestratorStats {
    /// Per-server request counters.
    pub servers: HashMap<String, ProxyStatsSnapshot>,
    /// Audit entries recorded so far.
    pub audit_entries: usize,
    /// Active session grants.
    pub active_grants: usize,
    /// Shadowing detector counters.
    pub shadowing: DetectorMetricsSnapshot,
}

/// Runs one proxy core per configured server.
pub struct Orchestrator {
    document: ConfigDocument,
    policy: Arc<PolicyEngine>,
    sessions: Arc<SessionCache>,
    audit: Arc<AuditSink>,
    detector: Arc<ShadowingDetector>,
    approval: Arc<dyn ApprovalHandler>,
    cores: Mutex<HashMap<String, Arc<ProxyCore>>>,
}

impl Orchestrator {
    /// Build the shared components from a validated document.
    ///
    /// # Errors
    ///
    /// Returns the policy engine's validation or parse error when the
    /// document cannot be activated.
    pub fn new(
        document: ConfigDocument,
        approval: Arc<dyn ApprovalHandler>,
    ) -> Result<(Self, ValidationReport), overwatch_policy::PolicyError> {
        let policy = Arc::new(PolicyEngine::new(false));
        let report = policy.load(&document)?;

        let sessions = Arc::new(SessionCache::in_memory());
        SessionCache::spawn_cleanup_task(&sessions, Duration::from_secs(60));

        let storage = match document.audit.retention {
            Some(cap) => MemoryAuditStorage::with_retention(cap),
            None => MemoryAuditStorage::new(),
        };
        let mut audit = AuditSink::with_storage(Box::new(storage));
        if !document.audit.redact_pii {
            audit = audit.without_export_redaction();
        }
        let audit = Arc::new(audit);

        let detector = Arc::new(ShadowingDetector::new(DetectorConfig {
            check_descriptions: document.tool_shadowing.check_descriptions,
            detect_mutations: document.tool_shadowing.detect_mutations,
            ..DetectorConfig::default()
        }));

        Ok((
            Self {
                document,
                policy,
                sessions,
                audit,
                detector,
                approval,
                cores: Mutex::new(HashMap::new()),
            },
            report,
        ))
    }

    /// The shared policy engine.
    #[must_use]
    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// The shared session cache.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    /// The shared audit sink.
    #[must_use]
    pub fn audit(&self) -> &Arc<AuditSink> {
        &self.audit
    }

    /// The shared shadowing detector.
    #[must_use]
    pub fn detector(&self) -> &Arc<ShadowingDetector> {
        &self.detector
    }

    fn proxy_config(&self, name: &str) -> ProxyResult<ProxyConfig> {
        let entry = self
            .document
            .servers
            .get(name)
            .ok_or_else(|| ProxyError::UnknownServer(name.to_string()))?;
        let command = entry
            .command
            .clone()
            .ok_or_else(|| ProxyError::Misconfigured {
                server: name.to_string(),
                reason: "no upstream command".to_string(),
            })?;

        let mut config = ProxyConfig::new(name, command);
        config.args = entry.args.clone();
        config.env = entry.env.clone();
        config.request_timeout = Duration::from_millis(self.document.defaults.timeout_ms);
        config.fail_mode = FailMode::Closed;
        Ok(config)
    }

    /// Start one configured server against the given client streams.
    ///
    /// # Errors
    ///
    /// Returns an error when the server is unknown, has no command, or
    /// its upstream fails to spawn.
    pub async fn start_single(
        &self,
        name: &str,
        client_reader: impl AsyncRead + Send + Unpin + 'static,
        client_writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> ProxyResult<Arc<ProxyCore>> {
        let config = self.proxy_config(name)?;
        let core = ProxyCore::start(
            config,
            Arc::clone(&self.policy),
            Arc::clone(&self.sessions),
            Arc::clone(&self.audit),
            Arc::clone(&self.detector),
            Arc::clone(&self.approval),
            client_reader,
            client_writer,
        )?;
        let core = Arc::new(core);
        self.cores
            .lock()
            .await
            .insert(name.to_string(), Arc::clone(&core));
        Ok(core)
    }

    /// Start every configured server, obtaining client streams from
    /// `client_io`. Individual failures are logged and skipped; the
    /// rest continue. Returns the number of cores running.
    pub async fn start(&self, mut client_io: impl FnMut(&str) -> ClientIo) -> usize {
        let names: Vec<String> = self.document.servers.keys().cloned().collect();
        let mut started = 0usize;
        for name in names {
            let (reader, writer) = client_io(&name);
            match self.start_single(&name, reader, writer).await {
                Ok(_) => {
                    started = started.saturating_add(1);
                },
                Err(e) => {
                    error!(server = %name, error = %e, "failed to start proxy core");
                },
            }
        }
        info!(started, "orchestrator started");
        started
    }

    /// Names of currently running servers.
    pub async fn list_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cores.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Shut down one server and remove it from the active set.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::UnknownServer`] when no core runs under
    /// that name.
    pub async fn shutdown_server(&self, name: &str) -> ProxyResult<()> {
        let core = self
            .cores
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| ProxyError::UnknownServer(name.to_string()))?;
        core.shutdown().await
    }

    /// Shut down every core in parallel, swallowing individual errors.
    pub async fn shutdown(&self) {
        let cores: Vec<(String, Arc<ProxyCore>)> = self.cores.lock().await.drain().collect();
        let shutdowns = cores.into_iter().map(|(name, core)| async move {
            if let Err(e) = core.shutdown().await {
                warn!(server = %name, error = %e, "core shutdown error");
            }
        });
        join_all(shutdowns).await;
        self.approval.close().await;
        info!("orchestrator stopped");
    }

    /// Aggregated statistics across shared components and every core.
    pub async fn stats(&self) -> OrchestratorStats {
        let cores = self.cores.lock().await;
        let servers = cores
            .iter()
            .map(|(name, core)| (name.clone(), core.stats()))
            .collect();
        OrchestratorStats {
            servers,
            audit_entries: self.audit.count().unwrap_or(0),
            active_grants: self
                .sessions
                .stats()
                .map(|s| s.active)
                .unwrap_or(0),
            shadowing: self.detector.metrics(),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("servers", &self.document.servers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overwatch_approval::StaticApprover;

    fn document() -> ConfigDocument {
        ConfigDocument::from_str(
            r#"
version: 1
servers:
  echo:
    command: cat
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_orchestrator_lifecycle() {
        let (orchestrator, report) =
            Orchestrator::new(document(), Arc::new(StaticApprover::approve_all())).unwrap();
        assert!(report.errors().is_empty());

        let mut client_halves = Vec::new();
        let started = orchestrator
            .start(|_name| {
                let (client_side, proxy_side) = tokio::io::duplex(4096);
                client_halves.push(client_side);
                let (read, write) = tokio::io::split(proxy_side);
                (Box::new(read) as _, Box::new(write) as _)
            })
            .await;
        assert_eq!(started, 1);
        assert_eq!(orchestrator.list_servers().await, vec!["echo".to_string()]);

        let stats = orchestrator.stats().await;
        assert!(stats.servers.contains_key("echo"));

        orchestrator.shutdown().await;
        assert!(orchestrator.list_servers().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_server_unknown_is_error() {
        let (orchestrator, _) =
            Orchestrator::new(document(), Arc::new(StaticApprover::approve_all())).unwrap();
        assert!(orchestrator.shutdown_server("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_start_tolerates_individual_failures() {
        let doc = ConfigDocument::from_str(
            r#"
version: 1
servers:
  good:
    command: cat
  bad:
    command: /nonexistent/overwatch-test-binary
"#,
        )
        .unwrap();
        let (orchestrator, _) =
            Orchestrator::new(doc, Arc::new(StaticApprover::approve_all())).unwrap();

        let mut client_halves = Vec::new();
        let started = orchestrator
            .start(|_name| {
                let (client_side, proxy_side) = tokio::io::duplex(4096);
                client_halves.push(client_side);
                let (read, write) = tokio::io::split(proxy_side);
                (Box::new(read) as _, Box::new(write) as _)
            })
            .await;
        assert_eq!(started, 1);
        assert_eq!(orchestrator.list_servers().await, vec!["good".to_string()]);

        orchestrator.shutdown().await;
    }
}
