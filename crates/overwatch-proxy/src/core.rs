//! The per-server proxy core and its driver task.
//!
//! Every state transition happens on one driver task between awaits, so
//! the pending table, circuit breaker, and upstream link never race.
//! Exactly one of {response, per-request timeout, sweep, upstream
//! failure, shutdown} completes each pending request.

use overwatch_approval::{ApprovalHandler, ApprovalRequest, SessionDuration};
use overwatch_audit::{AuditDecision, AuditSink, NewAuditEntry};
use overwatch_core::{FailMode, PolicyAction, RiskLevel, env_policy};
use overwatch_policy::PolicyEngine;
use overwatch_sessions::{CreateGrantOptions, GrantDuration, GrantScope, SessionCache};
use overwatch_shadowing::ShadowingDetector;
use overwatch_transport::{
    FramedTransport, JsonRpcMessage, JsonRpcRequest, RequestId, TransportEvent,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::time::delay_queue::{DelayQueue, Expired, Key};
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult, codes};
use crate::events::{Direction, ProxyEvent};
use crate::stats::{ProxyStats, ProxyStatsSnapshot};

enum Command {
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running per-server proxy.
pub struct ProxyCore {
    server_name: String,
    cmd_tx: StdMutex<Option<mpsc::Sender<Command>>>,
    driver: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ProxyEvent>,
    stats: Arc<ProxyStats>,
    shutting_down: Arc<AtomicBool>,
}

impl ProxyCore {
    /// Spawn the upstream child and start relaying between the given
    /// client streams and the child's stdio.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Spawn`] or [`ProxyError::MissingStdio`]
    /// when the upstream child cannot be started.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        config: ProxyConfig,
        policy: Arc<PolicyEngine>,
        sessions: Arc<SessionCache>,
        audit: Arc<AuditSink>,
        detector: Arc<ShadowingDetector>,
        approval: Arc<dyn ApprovalHandler>,
        client_reader: impl AsyncRead + Send + Unpin + 'static,
        client_writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> ProxyResult<Self> {
        let (upstream, upstream_rx) = spawn_upstream(&config)?;
        let (client, client_rx) =
            FramedTransport::spawn(client_reader, client_writer, config.relay_limits());

        let (events, _) = broadcast::channel(64);
        let stats = Arc::new(ProxyStats::default());
        let shutting_down = Arc::new(AtomicBool::new(false));
        let (cmd_tx, cmd_rx) = mpsc::channel(4);

        let server_name = config.server_name.clone();
        let breaker = CircuitBreaker::new(config.breaker);
        let driver = Driver {
            config,
            policy,
            sessions,
            audit,
            detector,
            approval,
            events: events.clone(),
            stats: Arc::clone(&stats),
            shutting_down: Arc::clone(&shutting_down),
            client,
            client_rx,
            upstream: Some(upstream),
            upstream_rx,
            upstream_alive: true,
            pending: HashMap::new(),
            timers: DelayQueue::new(),
            breaker,
        };
        let handle = tokio::spawn(driver.run(cmd_rx));

        info!(server = %server_name, "proxy core started");
        Ok(Self {
            server_name,
            cmd_tx: StdMutex::new(Some(cmd_tx)),
            driver: tokio::sync::Mutex::new(Some(handle)),
            events,
            stats,
            shutting_down,
        })
    }

    /// The configured server name.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Subscribe to proxy events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    /// Current counter values.
    #[must_use]
    pub fn stats(&self) -> ProxyStatsSnapshot {
        self.stats.snapshot()
    }

    /// Graceful shutdown: answer every pending request with
    /// `SERVER_SHUTTING_DOWN`, close both transports, terminate the
    /// child (SIGTERM, then SIGKILL after 5 s), and return once it has
    /// exited. Idempotent.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for stricter
    /// teardown checks.
    pub async fn shutdown(&self) -> ProxyResult<()> {
        self.shutting_down.store(true, Ordering::SeqCst);

        let cmd_tx = self.cmd_tx.lock().ok().and_then(|mut slot| slot.take());
        if let Some(cmd_tx) = cmd_tx {
            let (done_tx, done_rx) = oneshot::channel();
            if cmd_tx.send(Command::Shutdown(done_tx)).await.is_ok() {
                let _ = done_rx.await;
            }
        }

        let handle = self.driver.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!(server = %self.server_name, "proxy core stopped");
        Ok(())
    }
}

impl std::fmt::Debug for ProxyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCore")
            .field("server", &self.server_name)
            .finish_non_exhaustive()
    }
}

struct UpstreamLink {
    transport: FramedTransport,
    child: Child,
}

struct Pending {
    method: String,
    tool_name: Option<String>,
    deadline: Instant,
    timer: Key,
}

/// What one pass of the select loop observed.
enum Step {
    Command(Option<Command>),
    Client(Option<TransportEvent>),
    Upstream(Option<TransportEvent>),
    RequestTimeout(RequestId),
    Sweep,
}

struct Driver {
    config: ProxyConfig,
    policy: Arc<PolicyEngine>,
    sessions: Arc<SessionCache>,
    audit: Arc<AuditSink>,
    detector: Arc<ShadowingDetector>,
    approval: Arc<dyn ApprovalHandler>,
    events: broadcast::Sender<ProxyEvent>,
    stats: Arc<ProxyStats>,
    shutting_down: Arc<AtomicBool>,
    client: FramedTransport,
    client_rx: mpsc::Receiver<TransportEvent>,
    upstream: Option<UpstreamLink>,
    upstream_rx: mpsc::Receiver<TransportEvent>,
    upstream_alive: bool,
    pending: HashMap<RequestId, Pending>,
    timers: DelayQueue<RequestId>,
    breaker: CircuitBreaker,
}

impl Driver {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep.tick().await; // the immediate first tick

        loop {
            let step = tokio::select! {
                biased;
                cmd = cmd_rx.recv() => Step::Command(cmd),
                event = self.client_rx.recv() => Step::Client(event),
                event = self.upstream_rx.recv(), if self.upstream_alive => Step::Upstream(event),
                Some(expired) = next_expired(&mut self.timers) => {
                    Step::RequestTimeout(expired.into_inner())
                },
                _ = sweep.tick() => Step::Sweep,
            };

            match step {
                Step::Command(cmd) => {
                    let done = match cmd {
                        Some(Command::Shutdown(done)) => Some(done),
                        None => None,
                    };
                    self.graceful_shutdown().await;
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                    return;
                },
                Step::Client(Some(TransportEvent::Message(message))) => {
                    self.on_client_message(message).await;
                },
                Step::Client(Some(TransportEvent::Error(error))) => {
                    warn!(server = %self.config.server_name, %error, "client protocol error");
                },
                Step::Client(Some(TransportEvent::Closed) | None) => {
                    debug!(server = %self.config.server_name, "client stream closed");
                    self.graceful_shutdown().await;
                    return;
                },
                Step::Upstream(Some(TransportEvent::Message(message))) => {
                    self.on_upstream_message(message).await;
                },
                Step::Upstream(Some(TransportEvent::Error(error))) => {
                    warn!(server = %self.config.server_name, %error, "upstream protocol error");
                },
                Step::Upstream(Some(TransportEvent::Closed) | None) => {
                    self.on_upstream_failure("upstream stream closed").await;
                },
                Step::RequestTimeout(id) => {
                    if let Some(pending) = self.pending.remove(&id) {
                        self.complete_as_timeout(id, pending).await;
                    }
                },
                Step::Sweep => self.on_sweep().await,
            }
        }
    }

    // -- client -> upstream --

    async fn on_client_message(&mut self, message: JsonRpcMessage) {
        let size = message.to_bytes().map(|b| b.len()).unwrap_or(0);
        if size > self.config.max_message_size {
            let _ = self.events.send(ProxyEvent::MessageTooLarge {
                direction: Direction::ClientToUpstream,
                size,
            });
            if let JsonRpcMessage::Request(request) = &message {
                self.reply_error(
                    request.id.clone(),
                    codes::REQUEST_TOO_LARGE,
                    format!(
                        "Request of {size} bytes exceeds the {} byte limit",
                        self.config.max_message_size
                    ),
                    None,
                )
                .await;
            }
            return;
        }

        if !self.breaker.can_execute() {
            if let JsonRpcMessage::Request(request) = &message {
                self.reply_error(
                    request.id.clone(),
                    codes::CIRCUIT_BREAKER_OPEN,
                    "Circuit breaker is open: upstream is failing",
                    None,
                )
                .await;
            }
            return;
        }

        ProxyStats::bump(&self.stats.requests_total);

        match message {
            JsonRpcMessage::Notification(_) | JsonRpcMessage::Response(_) => {
                // Notifications are untracked; responses answer
                // upstream-initiated requests.
                self.forward_to_upstream(&message).await;
            },
            JsonRpcMessage::Request(request) if request.method == "tools/call" => {
                self.handle_tool_call(request).await;
            },
            JsonRpcMessage::Request(request) => {
                let id = request.id.clone();
                let method = request.method.clone();
                if self
                    .forward_to_upstream(&JsonRpcMessage::Request(request))
                    .await
                {
                    self.track(id, method, None);
                } else {
                    self.reply_upstream_unavailable(id).await;
                }
            },
        }
    }

    async fn handle_tool_call(&mut self, request: JsonRpcRequest) {
        let (tool_name, tool_args) = extract_tool_call(request.params.as_ref());
        let server = self.config.server_name.clone();

        let mut decision = self
            .policy
            .evaluate(&server, &tool_name, tool_args.as_ref());

        // A tool the upstream never advertised does not get to ride an
        // allow decision.
        if decision.action == PolicyAction::Allow
            && self.detector.has_server(&server)
            && self.detector.fingerprint(&server, &tool_name).is_none()
        {
            decision.action = PolicyAction::Prompt;
            decision.reason = format!("tool '{tool_name}' is not in the registered tool set");
        }

        if decision.action == PolicyAction::Deny {
            self.deny_tool_call(
                request.id,
                &tool_name,
                tool_args,
                decision.risk_level,
                decision.reason.clone(),
            )
            .await;
            return;
        }

        let mut session_id: Option<String> = None;
        if decision.action == PolicyAction::Prompt {
            match self.sessions.check(&tool_name, Some(&server)) {
                Ok(Some(grant)) => {
                    debug!(server = %server, tool = %tool_name, grant = %grant.id, "session grant matched");
                    session_id = Some(grant.id);
                },
                Ok(None) => {
                    match self
                        .request_approval(&tool_name, tool_args.clone(), &decision.reason, decision.risk_level)
                        .await
                    {
                        ApprovalOutcome::Approved { grant_id } => {
                            session_id = grant_id;
                        },
                        ApprovalOutcome::Denied { reason } => {
                            self.deny_tool_call(
                                request.id,
                                &tool_name,
                                tool_args,
                                decision.risk_level,
                                reason,
                            )
                            .await;
                            return;
                        },
                    }
                },
                Err(error) => {
                    // A broken grant store means no short-circuit; the
                    // approval path still runs.
                    warn!(%error, "session cache unavailable");
                    match self
                        .request_approval(&tool_name, tool_args.clone(), &decision.reason, decision.risk_level)
                        .await
                    {
                        ApprovalOutcome::Approved { grant_id } => session_id = grant_id,
                        ApprovalOutcome::Denied { reason } => {
                            self.deny_tool_call(
                                request.id,
                                &tool_name,
                                tool_args,
                                decision.risk_level,
                                reason,
                            )
                            .await;
                            return;
                        },
                    }
                },
            }
        }

        // Decision audited before any response can be produced.
        self.audit_tool(
            AuditDecision::Allowed,
            &tool_name,
            tool_args,
            decision.risk_level,
            session_id,
            None,
        );

        let id = request.id.clone();
        if self
            .forward_to_upstream(&JsonRpcMessage::Request(request))
            .await
        {
            self.track(id, "tools/call".to_string(), Some(tool_name));
        } else {
            self.reply_upstream_unavailable(id).await;
        }
    }

    async fn request_approval(
        &mut self,
        tool_name: &str,
        tool_args: Option<Value>,
        reason: &str,
        risk_level: RiskLevel,
    ) -> ApprovalOutcome {
        let mut approval_request = ApprovalRequest::new(tool_name, risk_level)
            .server(&self.config.server_name)
            .reason(reason);
        if let Some(args) = tool_args.clone() {
            approval_request = approval_request.args(args);
        }

        match self.approval.request_approval(&approval_request).await {
            Ok(response) if response.approved => {
                ProxyStats::bump(&self.stats.approvals);
                let grant_id = match response.session_duration {
                    Some(duration) => self.create_grant(tool_name, tool_args, risk_level, duration),
                    None => None,
                };
                ApprovalOutcome::Approved { grant_id }
            },
            Ok(response) => ApprovalOutcome::Denied {
                reason: response
                    .reason
                    .unwrap_or_else(|| "User denied".to_string()),
            },
            Err(error) => match self.config.fail_mode {
                FailMode::Open => {
                    warn!(%error, "approval handler failed; fail-open allows the call");
                    ApprovalOutcome::Approved { grant_id: None }
                },
                FailMode::Readonly => {
                    let _ = self.events.send(ProxyEvent::FailModeWarning {
                        reason: format!("approval handler failed: {error}"),
                    });
                    ApprovalOutcome::Denied {
                        reason: format!("Approval handler error: {error}"),
                    }
                },
                FailMode::Closed => ApprovalOutcome::Denied {
                    reason: format!("Approval handler error: {error}"),
                },
            },
        }
    }

    fn create_grant(
        &self,
        tool_name: &str,
        tool_args: Option<Value>,
        risk_level: RiskLevel,
        duration: SessionDuration,
    ) -> Option<String> {
        let mut options = CreateGrantOptions::new(
            GrantScope::Exact,
            tool_name,
            map_session_duration(duration),
        )
        .server(&self.config.server_name);
        options.tool_name = Some(tool_name.to_string());
        options.tool_args = tool_args;
        options.risk_level = Some(risk_level);
        options.source = Some("approval".to_string());

        match self.sessions.create(options) {
            Ok(grant) => Some(grant.id),
            Err(error) => {
                warn!(%error, "failed to create session grant");
                None
            },
        }
    }

    async fn deny_tool_call(
        &mut self,
        id: RequestId,
        tool_name: &str,
        tool_args: Option<Value>,
        risk_level: RiskLevel,
        reason: String,
    ) {
        ProxyStats::bump(&self.stats.denials);
        self.audit_tool(
            AuditDecision::Denied,
            tool_name,
            tool_args,
            risk_level,
            None,
            Some(reason.clone()),
        );
        self.reply_error(
            id,
            codes::TOOL_DENIED,
            format!("Tool call denied: {reason}"),
            Some(json!({ "riskLevel": risk_level })),
        )
        .await;
    }

    // -- upstream -> client --

    async fn on_upstream_message(&mut self, message: JsonRpcMessage) {
        let size = message.to_bytes().map(|b| b.len()).unwrap_or(0);
        if size > self.config.max_message_size {
            let _ = self.events.send(ProxyEvent::MessageTooLarge {
                direction: Direction::UpstreamToClient,
                size,
            });
            // Still forwarded: the upstream is trusted enough to relay,
            // the event lets operators notice.
        }

        match &message {
            JsonRpcMessage::Response(response) => {
                let Some(pending) = self.pending.remove(&response.id) else {
                    debug!(id = %response.id, "response for unknown or completed id, dropped");
                    return;
                };
                self.timers.try_remove(&pending.timer);
                self.breaker.record_success();

                if pending.method == "tools/list"
                    && let Some(result) = &response.result
                {
                    self.inspect_tool_listing(result);
                }

                if let Err(error) = self.client.send(&message).await {
                    warn!(%error, "failed to relay response to client");
                }
            },
            JsonRpcMessage::Request(_) | JsonRpcMessage::Notification(_) => {
                if let Err(error) = self.client.send(&message).await {
                    warn!(%error, "failed to relay upstream message to client");
                }
            },
        }
    }

    /// Register or re-check the tool set advertised in a `tools/list`
    /// result.
    fn inspect_tool_listing(&mut self, result: &Value) {
        let Some(tools) = result.get("tools").and_then(Value::as_array) else {
            return;
        };
        let server = self.config.server_name.clone();

        if self.detector.has_server(&server) {
            for tool in tools {
                if let Some(finding) = self.detector.check_for_mutation(&server, tool) {
                    warn!(server = %server, message = %finding.message, "shadowing finding");
                    let _ = self.events.send(ProxyEvent::Shadowing { finding });
                }
            }
        }

        let report = self.detector.register_tools(&server, tools);
        for finding in report.findings {
            warn!(server = %server, message = %finding.message, "shadowing finding");
            let _ = self.events.send(ProxyEvent::Shadowing { finding });
        }
    }

    // -- timeouts --

    async fn complete_as_timeout(&mut self, id: RequestId, pending: Pending) {
        ProxyStats::bump(&self.stats.requests_timed_out);
        self.breaker.record_failure();
        if let Some(tool_name) = &pending.tool_name {
            let timeout_ms =
                u64::try_from(self.config.request_timeout.as_millis()).unwrap_or(u64::MAX);
            let entry = NewAuditEntry::new(tool_name, RiskLevel::Write, AuditDecision::Denied)
                .server(&self.config.server_name)
                .error("Request timed out")
                .duration_ms(timeout_ms);
            if let Err(error) = self.audit.log(entry) {
                warn!(%error, "audit log failed");
            }
        }
        self.reply_error(
            id,
            codes::REQUEST_TIMEOUT,
            format!(
                "Request timed out after {} ms",
                self.config.request_timeout.as_millis()
            ),
            None,
        )
        .await;
    }

    /// Safety-net sweep: reap anything past its deadline whose timer
    /// did not fire.
    async fn on_sweep(&mut self) {
        let now = Instant::now();
        let overdue: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, pending)| now >= pending.deadline)
            .map(|(id, _)| id.clone())
            .collect();
        for id in overdue {
            if let Some(pending) = self.pending.remove(&id) {
                self.timers.try_remove(&pending.timer);
                self.complete_as_timeout(id, pending).await;
            }
        }
    }

    // -- upstream failure and recovery --

    async fn on_upstream_failure(&mut self, reason: &str) {
        if !self.upstream_alive {
            return;
        }
        warn!(server = %self.config.server_name, reason, "upstream failed");
        self.upstream_alive = false;
        ProxyStats::bump(&self.stats.requests_failed);
        let _ = self.events.send(ProxyEvent::UpstreamClosed);

        // All pending timers are cleared; fail mode decides whether the
        // requests are answered now or left to the sweep.
        match self.config.fail_mode {
            FailMode::Closed => {
                let drained: Vec<(RequestId, Pending)> = self.pending.drain().collect();
                for (id, pending) in drained {
                    self.timers.try_remove(&pending.timer);
                    if let Some(tool_name) = &pending.tool_name {
                        let entry = NewAuditEntry::new(
                            tool_name,
                            RiskLevel::Write,
                            AuditDecision::Denied,
                        )
                        .server(&self.config.server_name)
                        .error("Upstream unavailable");
                        if let Err(error) = self.audit.log(entry) {
                            warn!(%error, "audit log failed");
                        }
                    }
                    self.reply_error(
                        id,
                        codes::UPSTREAM_UNAVAILABLE,
                        "Upstream server is unavailable",
                        None,
                    )
                    .await;
                }
            },
            FailMode::Readonly => {
                let _ = self.events.send(ProxyEvent::FailModeWarning {
                    reason: format!("upstream failed in readonly mode: {reason}"),
                });
                self.clear_timers_keep_pending();
            },
            FailMode::Open => {
                self.clear_timers_keep_pending();
            },
        }

        if self.config.recovery.enabled && !self.shutting_down.load(Ordering::SeqCst) {
            self.attempt_recovery().await;
        }
    }

    fn clear_timers_keep_pending(&mut self) {
        for pending in self.pending.values() {
            self.timers.try_remove(&pending.timer);
        }
    }

    async fn attempt_recovery(&mut self) {
        let max_attempts = self.config.recovery.max_attempts;
        for attempt in 1..=max_attempts {
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            let delay = self.config.recovery.delay_for_attempt(attempt);
            let _ = self.events.send(ProxyEvent::RecoveryAttempt {
                attempt,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            });
            tokio::time::sleep(delay).await;
            if self.shutting_down.load(Ordering::SeqCst) {
                return;
            }

            if let Some(old) = self.upstream.take() {
                old.transport.close();
                let mut child = old.child;
                let _ = child.start_kill();
                let _ = child.wait().await;
            }

            match spawn_upstream(&self.config) {
                Ok((link, rx)) => {
                    self.upstream = Some(link);
                    self.upstream_rx = rx;
                    self.upstream_alive = true;
                    info!(server = %self.config.server_name, attempt, "upstream recovered");
                    let _ = self.events.send(ProxyEvent::RecoverySuccess { attempt });
                    return;
                },
                Err(error) => {
                    warn!(server = %self.config.server_name, attempt, %error, "recovery attempt failed");
                    let _ = self.events.send(ProxyEvent::RecoveryError {
                        attempt,
                        error: error.to_string(),
                    });
                },
            }
        }
        warn!(server = %self.config.server_name, attempts = max_attempts, "recovery exhausted");
        let _ = self.events.send(ProxyEvent::RecoveryFailed {
            attempts: max_attempts,
        });
    }

    // -- shutdown --

    async fn graceful_shutdown(&mut self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.events.send(ProxyEvent::ShuttingDown);

        let drained: Vec<(RequestId, Pending)> = self.pending.drain().collect();
        self.timers.clear();
        for (id, pending) in drained {
            if let Some(tool_name) = &pending.tool_name {
                let entry =
                    NewAuditEntry::new(tool_name, RiskLevel::Write, AuditDecision::Denied)
                        .server(&self.config.server_name)
                        .error("Server shutting down");
                if let Err(error) = self.audit.log(entry) {
                    warn!(%error, "audit log failed");
                }
            }
            self.reply_error(
                id,
                codes::SERVER_SHUTTING_DOWN,
                "Server is shutting down",
                None,
            )
            .await;
        }

        self.client.close();
        if let Some(upstream) = self.upstream.take() {
            upstream.transport.close();
            terminate_child(upstream.child).await;
        }
        self.upstream_alive = false;
    }

    // -- helpers --

    fn track(&mut self, id: RequestId, method: String, tool_name: Option<String>) {
        let timer = self.timers.insert(id.clone(), self.config.request_timeout);
        let deadline = Instant::now()
            .checked_add(self.config.request_timeout)
            .unwrap_or_else(Instant::now);
        let pending = Pending {
            method,
            tool_name,
            deadline,
            timer,
        };
        if let Some(previous) = self.pending.insert(id, pending) {
            // A client reusing an in-flight id violates the protocol;
            // the older entry can no longer be answered.
            self.timers.try_remove(&previous.timer);
        }
    }

    async fn forward_to_upstream(&mut self, message: &JsonRpcMessage) -> bool {
        let Some(upstream) = &self.upstream else {
            return false;
        };
        if !self.upstream_alive {
            return false;
        }
        match upstream.transport.send(message).await {
            Ok(()) => true,
            Err(error) => {
                self.on_upstream_failure(&format!("write error: {error}")).await;
                false
            },
        }
    }

    async fn reply_upstream_unavailable(&mut self, id: RequestId) {
        if self.config.fail_mode == FailMode::Closed {
            self.reply_error(
                id,
                codes::UPSTREAM_UNAVAILABLE,
                "Upstream server is unavailable",
                None,
            )
            .await;
        }
    }

    async fn reply_error(&self, id: RequestId, code: i64, message: impl Into<String>, data: Option<Value>) {
        let reply = JsonRpcMessage::error_response(id, code, message, data);
        if let Err(error) = self.client.send(&reply).await {
            debug!(%error, "failed to send error reply");
        }
    }

    fn audit_tool(
        &self,
        decision: AuditDecision,
        tool_name: &str,
        tool_args: Option<Value>,
        risk_level: RiskLevel,
        session_id: Option<String>,
        error: Option<String>,
    ) {
        let mut entry = NewAuditEntry::new(tool_name, risk_level, decision)
            .server(&self.config.server_name);
        if let Some(args) = tool_args {
            entry = entry.args(args);
        }
        if let Some(session_id) = session_id {
            entry = entry.session(session_id);
        }
        if let Some(error) = error {
            entry = entry.error(error);
        }
        if let Err(log_error) = self.audit.log(entry) {
            // Storage trouble must never fail the request flow.
            warn!(error = %log_error, "audit log failed");
        }
    }
}

enum ApprovalOutcome {
    Approved { grant_id: Option<String> },
    Denied { reason: String },
}

/// Pull the tool name and arguments out of `tools/call` params.
fn extract_tool_call(params: Option<&Value>) -> (String, Option<Value>) {
    let name = params
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let args = params.and_then(|p| p.get("arguments")).cloned();
    (name, args)
}

fn map_session_duration(duration: SessionDuration) -> GrantDuration {
    match duration {
        SessionDuration::Once => GrantDuration::Once,
        SessionDuration::FiveMin => GrantDuration::FiveMin,
        SessionDuration::FifteenMin => GrantDuration::FifteenMin,
        SessionDuration::Session => GrantDuration::Session,
    }
}

/// Spawn the upstream child with a sanitized environment and wire a
/// framed transport onto its stdio.
fn spawn_upstream(
    config: &ProxyConfig,
) -> ProxyResult<(UpstreamLink, mpsc::Receiver<TransportEvent>)> {
    let env = env_policy::sanitize_environment(std::env::vars(), &config.env);

    let mut command = tokio::process::Command::new(&config.command);
    command
        .args(&config.args)
        .env_clear()
        .envs(&env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ProxyError::Spawn {
        command: config.command.clone(),
        source,
    })?;
    let stdin = child.stdin.take().ok_or(ProxyError::MissingStdio("stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or(ProxyError::MissingStdio("stdout"))?;

    let (transport, rx) = FramedTransport::spawn(stdout, stdin, config.relay_limits());
    Ok((UpstreamLink { transport, child }, rx))
}

/// SIGTERM, wait up to five seconds, then SIGKILL.
async fn terminate_child(mut child: Child) {
    #[allow(clippy::cast_possible_wrap)]
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(_) => {},
            Err(_) => {
                debug!("child ignored SIGTERM, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
            },
        }
    } else {
        let _ = child.wait().await;
    }
}

async fn next_expired(queue: &mut DelayQueue<RequestId>) -> Option<Expired<RequestId>> {
    futures::future::poll_fn(|cx| queue.poll_expired(cx)).await
}
