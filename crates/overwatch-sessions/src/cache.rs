//! The session cache: grant creation, matching, revocation, pruning.

use chrono::{DateTime, Utc};
use overwatch_core::RiskLevel;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration as StdDuration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SessionResult;
use crate::grant::{GrantAuditInfo, GrantDuration, GrantScope, Revocation, SessionGrant};
use crate::store::{GrantStore, MemoryGrantStore};

/// Default interval between background prune ticks.
pub const DEFAULT_CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// Options for [`SessionCache::create`].
///
/// One options record replaces constructor overloads: callers fill what
/// they have and leave the rest `None`.
#[derive(Debug, Clone)]
pub struct CreateGrantOptions {
    /// Matching scope.
    pub scope: GrantScope,
    /// Tool name or glob, depending on scope.
    pub pattern: String,
    /// Grant lifetime.
    pub duration: GrantDuration,
    /// Server constraint.
    pub server: Option<String>,
    /// Who approved the original call.
    pub approver: Option<String>,
    /// Tool name from the approved call.
    pub tool_name: Option<String>,
    /// Arguments from the approved call.
    pub tool_args: Option<Value>,
    /// Risk level the approved call carried.
    pub risk_level: Option<RiskLevel>,
    /// Reason supplied with the approval.
    pub reason: Option<String>,
    /// Where the approval came from (terminal, webhook, ...).
    pub source: Option<String>,
}

impl CreateGrantOptions {
    /// Minimal options: scope, pattern, and duration.
    #[must_use]
    pub fn new(scope: GrantScope, pattern: impl Into<String>, duration: GrantDuration) -> Self {
        Self {
            scope,
            pattern: pattern.into(),
            duration,
            server: None,
            approver: None,
            tool_name: None,
            tool_args: None,
            risk_level: None,
            reason: None,
            source: None,
        }
    }

    /// Constrain the grant to one server.
    #[must_use]
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Record who approved the call.
    #[must_use]
    pub fn approver(mut self, approver: impl Into<String>) -> Self {
        self.approver = Some(approver.into());
        self
    }

    fn audit_info(&self) -> Option<GrantAuditInfo> {
        let any_present = self.approver.is_some()
            || self.tool_name.is_some()
            || self.tool_args.is_some()
            || self.risk_level.is_some()
            || self.reason.is_some()
            || self.source.is_some();
        any_present.then(|| GrantAuditInfo {
            approver: self.approver.clone(),
            tool_name: self.tool_name.clone(),
            tool_args: self.tool_args.clone(),
            risk_level: self.risk_level,
            reason: self.reason.clone(),
            source: self.source.clone(),
        })
    }
}

/// Aggregate statistics over the grant store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Every stored grant, including expired and revoked ones.
    pub total: usize,
    /// Grants currently usable.
    pub active: usize,
    /// Grants past their expiry.
    pub expired: usize,
    /// Grants carrying a revocation stamp.
    pub revoked: usize,
    /// Sum of `use_count` over all grants.
    pub total_approvals: u64,
    /// Grant counts keyed by scope name.
    pub by_scope: HashMap<String, usize>,
    /// Grant counts keyed by server constraint.
    pub by_server: HashMap<String, usize>,
    /// When the background prune last ran.
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Shared cache of approval grants.
pub struct SessionCache {
    store: Box<dyn GrantStore>,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
}

impl SessionCache {
    /// Create a cache over in-memory storage.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_store(Box::new(MemoryGrantStore::new()))
    }

    /// Create a cache over a custom storage backend.
    #[must_use]
    pub fn with_store(store: Box<dyn GrantStore>) -> Self {
        Self {
            store,
            last_cleanup: Mutex::new(None),
        }
    }

    /// Create and store a grant from the given options.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn create(&self, options: CreateGrantOptions) -> SessionResult<SessionGrant> {
        let now = Utc::now();
        let grant = SessionGrant {
            id: Uuid::new_v4().simple().to_string(),
            scope: options.scope,
            pattern: options.pattern.clone(),
            server: options.server.clone(),
            created_at: now,
            expires_at: now
                .checked_add_signed(options.duration.as_chrono())
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            use_count: 0,
            last_used_at: None,
            audit: options.audit_info(),
            revocation: None,
        };
        debug!(
            id = %grant.id,
            scope = %grant.scope,
            pattern = %grant.pattern,
            expires_at = %grant.expires_at,
            "session grant created"
        );
        self.store.insert(grant.clone())?;
        Ok(grant)
    }

    /// Match an invocation against active grants, most recent first;
    /// the first match wins and gets one use recorded.
    ///
    /// A use means "this grant authorized a call"; whether the forwarded
    /// call later succeeds is the audit log's concern, not the grant's.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn check(&self, tool: &str, server: Option<&str>) -> SessionResult<Option<SessionGrant>> {
        let matched = self.store.check_and_record(tool, server, Utc::now())?;
        if let Some(grant) = &matched {
            debug!(
                id = %grant.id,
                tool = tool,
                use_count = grant.use_count,
                "session grant matched"
            );
        }
        Ok(matched)
    }

    /// Revoke one grant. Returns `false` if it does not exist or was
    /// already revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn revoke(
        &self,
        id: &str,
        by: Option<&str>,
        reason: Option<&str>,
    ) -> SessionResult<bool> {
        self.store.revoke(
            id,
            Revocation {
                revoked_at: Utc::now(),
                revoked_by: by.map(str::to_string),
                reason: reason.map(str::to_string),
            },
        )
    }

    /// Revoke every active grant whose stored pattern equals `pattern`.
    /// Returns the number revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn revoke_by_pattern(
        &self,
        pattern: &str,
        by: Option<&str>,
        reason: Option<&str>,
    ) -> SessionResult<usize> {
        self.revoke_where(by, reason, |g| g.pattern == pattern)
    }

    /// Revoke every active grant whose server constraint equals
    /// `server`. Returns the number revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn revoke_by_server(
        &self,
        server: &str,
        by: Option<&str>,
        reason: Option<&str>,
    ) -> SessionResult<usize> {
        self.revoke_where(by, reason, |g| g.server.as_deref() == Some(server))
    }

    /// Revoke every active grant. Returns the number revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn revoke_all(&self, by: Option<&str>, reason: Option<&str>) -> SessionResult<usize> {
        self.revoke_where(by, reason, |_| true)
    }

    fn revoke_where(
        &self,
        by: Option<&str>,
        reason: Option<&str>,
        predicate: impl Fn(&SessionGrant) -> bool,
    ) -> SessionResult<usize> {
        let now = Utc::now();
        let mut revoked = 0usize;
        for grant in self.store.list_all()? {
            if grant.is_active(now)
                && predicate(&grant)
                && self.store.revoke(
                    &grant.id,
                    Revocation {
                        revoked_at: now,
                        revoked_by: by.map(str::to_string),
                        reason: reason.map(str::to_string),
                    },
                )?
            {
                revoked = revoked.saturating_add(1);
            }
        }
        Ok(revoked)
    }

    /// Currently active grants, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn list(&self) -> SessionResult<Vec<SessionGrant>> {
        let now = Utc::now();
        let mut grants: Vec<SessionGrant> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|g| g.is_active(now))
            .collect();
        grants.reverse();
        Ok(grants)
    }

    /// Fetch one grant by id, regardless of state.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn get(&self, id: &str) -> SessionResult<Option<SessionGrant>> {
        self.store.get(id)
    }

    /// Physically prune expired grants; returns the count pruned.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn cleanup(&self) -> SessionResult<usize> {
        let pruned = self.store.prune_expired(Utc::now())?;
        if let Ok(mut last) = self.last_cleanup.lock() {
            *last = Some(Utc::now());
        }
        if pruned > 0 {
            debug!(pruned, "expired session grants pruned");
        }
        Ok(pruned)
    }

    /// Aggregate statistics over every stored grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails.
    pub fn stats(&self) -> SessionResult<SessionStats> {
        let now = Utc::now();
        let grants = self.store.list_all()?;

        let mut stats = SessionStats {
            total: grants.len(),
            active: 0,
            expired: 0,
            revoked: 0,
            total_approvals: 0,
            by_scope: HashMap::new(),
            by_server: HashMap::new(),
            last_cleanup: self.last_cleanup.lock().ok().and_then(|g| *g),
        };

        for grant in &grants {
            if grant.revocation.is_some() {
                stats.revoked = stats.revoked.saturating_add(1);
            } else if grant.is_expired(now) {
                stats.expired = stats.expired.saturating_add(1);
            } else {
                stats.active = stats.active.saturating_add(1);
            }
            stats.total_approvals = stats.total_approvals.saturating_add(grant.use_count);
            let count = stats
                .by_scope
                .entry(grant.scope.as_str().to_string())
                .or_insert(0);
            *count = count.saturating_add(1);
            if let Some(server) = &grant.server {
                let count = stats.by_server.entry(server.clone()).or_insert(0);
                *count = count.saturating_add(1);
            }
        }

        Ok(stats)
    }

    /// Spawn the background prune tick.
    ///
    /// The task holds only a [`Weak`] reference: when the last strong
    /// reference to the cache drops, the tick exits on its next firing
    /// instead of keeping the cache (or the process) alive.
    pub fn spawn_cleanup_task(cache: &Arc<Self>, interval: StdDuration) {
        let weak: Weak<Self> = Arc::downgrade(cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = cache.cleanup() {
                    warn!(error = %e, "background session cleanup failed");
                }
            }
        });
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> SessionCache {
        SessionCache::in_memory()
    }

    #[test]
    fn test_create_then_check_then_revoke() {
        let cache = cache();
        let grant = cache
            .create(CreateGrantOptions::new(
                GrantScope::Tool,
                "read_*",
                GrantDuration::FiveMin,
            ))
            .unwrap();

        let matched = cache.check("read_file", None).unwrap().unwrap();
        assert_eq!(matched.id, grant.id);
        assert_eq!(matched.use_count, 1);

        assert!(
            cache
                .revoke(&grant.id, Some("admin"), Some("policy change"))
                .unwrap()
        );
        assert!(cache.check("read_file", None).unwrap().is_none());
    }

    #[test]
    fn test_audit_block_only_when_options_present() {
        let cache = cache();
        let bare = cache
            .create(CreateGrantOptions::new(
                GrantScope::Exact,
                "x",
                GrantDuration::Once,
            ))
            .unwrap();
        assert!(bare.audit.is_none());

        let audited = cache
            .create(
                CreateGrantOptions::new(GrantScope::Exact, "x", GrantDuration::Once)
                    .approver("alice"),
            )
            .unwrap();
        let info = audited.audit.unwrap();
        assert_eq!(info.approver.as_deref(), Some("alice"));
    }

    #[test]
    fn test_expires_after_creation() {
        let cache = cache();
        for duration in [
            GrantDuration::Once,
            GrantDuration::FiveMin,
            GrantDuration::FifteenMin,
            GrantDuration::Session,
            GrantDuration::Millis(250),
        ] {
            let grant = cache
                .create(CreateGrantOptions::new(GrantScope::Exact, "x", duration))
                .unwrap();
            assert!(grant.expires_at > grant.created_at);
        }
    }

    #[test]
    fn test_bulk_revocations() {
        let cache = cache();
        cache
            .create(
                CreateGrantOptions::new(GrantScope::Tool, "read_*", GrantDuration::FiveMin)
                    .server("fs"),
            )
            .unwrap();
        cache
            .create(
                CreateGrantOptions::new(GrantScope::Tool, "write_*", GrantDuration::FiveMin)
                    .server("fs"),
            )
            .unwrap();
        cache
            .create(CreateGrantOptions::new(
                GrantScope::Tool,
                "read_*",
                GrantDuration::FiveMin,
            ))
            .unwrap();

        assert_eq!(
            cache
                .revoke_by_pattern("read_*", Some("admin"), None)
                .unwrap(),
            2
        );
        assert_eq!(cache.revoke_by_server("fs", None, None).unwrap(), 1);
        assert_eq!(cache.revoke_all(None, None).unwrap(), 0);
    }

    #[test]
    fn test_revoke_all_counts_remaining_active() {
        let cache = cache();
        for _ in 0..3 {
            cache
                .create(CreateGrantOptions::new(
                    GrantScope::Server,
                    "*",
                    GrantDuration::FiveMin,
                ))
                .unwrap();
        }
        assert_eq!(cache.revoke_all(Some("admin"), None).unwrap(), 3);
    }

    #[test]
    fn test_cleanup_prunes_expired() {
        let cache = cache();
        cache
            .create(CreateGrantOptions::new(
                GrantScope::Exact,
                "x",
                GrantDuration::Millis(0),
            ))
            .unwrap();
        cache
            .create(CreateGrantOptions::new(
                GrantScope::Exact,
                "y",
                GrantDuration::FiveMin,
            ))
            .unwrap();

        assert_eq!(cache.cleanup().unwrap(), 1);
        assert_eq!(cache.list().unwrap().len(), 1);
    }

    #[test]
    fn test_stats() {
        let cache = cache();
        let g = cache
            .create(
                CreateGrantOptions::new(GrantScope::Tool, "read_*", GrantDuration::FiveMin)
                    .server("fs"),
            )
            .unwrap();
        cache
            .create(CreateGrantOptions::new(
                GrantScope::Exact,
                "ls",
                GrantDuration::Millis(0),
            ))
            .unwrap();

        cache.check("read_file", Some("fs")).unwrap();
        cache.check("read_dir", Some("fs")).unwrap();
        cache.revoke(&g.id, None, None).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.revoked, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.total_approvals, 2);
        assert_eq!(stats.by_scope.get("tool"), Some(&1));
        assert_eq!(stats.by_server.get("fs"), Some(&1));
    }

    #[tokio::test]
    async fn test_cleanup_task_releases_cache() {
        let cache = Arc::new(SessionCache::in_memory());
        SessionCache::spawn_cleanup_task(&cache, StdDuration::from_millis(10));

        let weak = Arc::downgrade(&cache);
        drop(cache);
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(weak.upgrade().is_none(), "tick must not pin the cache");
    }
}
