//! Grant storage trait and the in-memory reference implementation.

use chrono::{DateTime, Utc};
use std::sync::RwLock;

use crate::error::{SessionError, SessionResult};
use crate::grant::{Revocation, SessionGrant};

/// Storage backend for session grants.
///
/// Implementations must be thread-safe, and [`GrantStore::check_and_record`]
/// must be atomic: a concurrent revoke may observe either "no match" or
/// "match with recorded use", never a match against a revoked grant.
///
/// A persistent implementation maps grants onto the relational table
/// `sessions(id TEXT PRIMARY KEY, scope TEXT, pattern TEXT, server TEXT
/// NULL, created_at INTEGER ms, expires_at INTEGER ms, approver TEXT
/// NULL, tool_name TEXT NULL, tool_args TEXT-JSON NULL, risk_level TEXT
/// NULL, reason TEXT NULL, source TEXT NULL, use_count INTEGER DEFAULT
/// 0, last_used_at INTEGER NULL, revoked_at INTEGER NULL, revoked_by
/// TEXT NULL, revoke_reason TEXT NULL)` with indexes on expires_at,
/// server, scope, approver, and created_at, using additive column
/// migrations only.
pub trait GrantStore: Send + Sync {
    /// Store a new grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant cannot be persisted.
    fn insert(&self, grant: SessionGrant) -> SessionResult<()>;

    /// Find the most recently created active grant matching the
    /// invocation, record one use on it, and return the updated grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn check_and_record(
        &self,
        tool: &str,
        server: Option<&str>,
        now: DateTime<Utc>,
    ) -> SessionResult<Option<SessionGrant>>;

    /// Fetch a grant by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn get(&self, id: &str) -> SessionResult<Option<SessionGrant>>;

    /// Every stored grant, including expired and revoked ones, in
    /// creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn list_all(&self) -> SessionResult<Vec<SessionGrant>>;

    /// Stamp a revocation on a grant that has none yet.
    ///
    /// Returns `false` when the grant does not exist or was already
    /// revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn revoke(&self, id: &str, revocation: Revocation) -> SessionResult<bool>;

    /// Physically remove expired grants; returns how many were pruned.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn prune_expired(&self, now: DateTime<Utc>) -> SessionResult<usize>;
}

/// In-memory grant storage.
#[derive(Debug, Default)]
pub struct MemoryGrantStore {
    grants: RwLock<Vec<SessionGrant>>,
}

impl MemoryGrantStore {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl GrantStore for MemoryGrantStore {
    fn insert(&self, grant: SessionGrant) -> SessionResult<()> {
        let mut grants = self
            .grants
            .write()
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        grants.push(grant);
        Ok(())
    }

    fn check_and_record(
        &self,
        tool: &str,
        server: Option<&str>,
        now: DateTime<Utc>,
    ) -> SessionResult<Option<SessionGrant>> {
        let mut grants = self
            .grants
            .write()
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        // Most recent first: insertion order reversed.
        for grant in grants.iter_mut().rev() {
            if grant.is_active(now) && grant.matches(tool, server) {
                grant.use_count = grant.use_count.saturating_add(1);
                grant.last_used_at = Some(now);
                return Ok(Some(grant.clone()));
            }
        }
        Ok(None)
    }

    fn get(&self, id: &str) -> SessionResult<Option<SessionGrant>> {
        let grants = self
            .grants
            .read()
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(grants.iter().find(|g| g.id == id).cloned())
    }

    fn list_all(&self) -> SessionResult<Vec<SessionGrant>> {
        let grants = self
            .grants
            .read()
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(grants.clone())
    }

    fn revoke(&self, id: &str, revocation: Revocation) -> SessionResult<bool> {
        let mut grants = self
            .grants
            .write()
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        for grant in grants.iter_mut() {
            if grant.id == id {
                if grant.revocation.is_some() {
                    return Ok(false);
                }
                grant.revocation = Some(revocation);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn prune_expired(&self, now: DateTime<Utc>) -> SessionResult<usize> {
        let mut grants = self
            .grants
            .write()
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        let before = grants.len();
        grants.retain(|g| !g.is_expired(now));
        Ok(before.saturating_sub(grants.len()))
    }
}
