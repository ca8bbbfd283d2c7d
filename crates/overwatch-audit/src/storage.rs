//! Audit storage trait and the in-memory reference implementation.

use std::sync::RwLock;

use crate::entry::{AuditEntry, AuditFilters};
use crate::error::{AuditError, AuditResult};

/// Storage backend for audit entries.
///
/// Implementations must be thread-safe and strictly append-only: an
/// entry, once stored, is never mutated or reordered.
///
/// A persistent implementation maps entries onto the relational table
/// `audit_entries(id TEXT PRIMARY KEY, timestamp INTEGER ms, server
/// TEXT NULL, tool TEXT, args TEXT-JSON NULL, risk_level TEXT, decision
/// TEXT, session_id TEXT NULL, duration INTEGER NULL, error TEXT NULL)`
/// with indexes on timestamp, server, risk_level, and decision, using
/// additive column migrations only.
pub trait AuditStorage: Send + Sync {
    /// Append one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be persisted.
    fn append(&self, entry: AuditEntry) -> AuditResult<()>;

    /// All entries matching `filters`, in insertion order.
    ///
    /// The limit in `filters` is applied by the caller after sorting;
    /// backends return every match.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails.
    fn scan(&self, filters: &AuditFilters) -> AuditResult<Vec<AuditEntry>>;

    /// Total stored entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn count(&self) -> AuditResult<usize>;
}

/// In-memory append-only storage.
///
/// An optional retention cap bounds memory: when set, appending beyond
/// the cap evicts the oldest entries.
#[derive(Debug, Default)]
pub struct MemoryAuditStorage {
    entries: RwLock<Vec<AuditEntry>>,
    retention: Option<usize>,
}

impl MemoryAuditStorage {
    /// Create unbounded in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage that retains at most `max_entries`.
    #[must_use]
    pub fn with_retention(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            retention: Some(max_entries),
        }
    }
}

impl AuditStorage for MemoryAuditStorage {
    fn append(&self, entry: AuditEntry) -> AuditResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| AuditError::Storage(e.to_string()))?;
        entries.push(entry);
        if let Some(cap) = self.retention
            && entries.len() > cap
        {
            let excess = entries.len().saturating_sub(cap);
            entries.drain(..excess);
        }
        Ok(())
    }

    fn scan(&self, filters: &AuditFilters) -> AuditResult<Vec<AuditEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| AuditError::Storage(e.to_string()))?;
        Ok(entries
            .iter()
            .filter(|e| filters.matches(e))
            .cloned()
            .collect())
    }

    fn count(&self) -> AuditResult<usize> {
        let entries = self
            .entries
            .read()
            .map_err(|e| AuditError::Storage(e.to_string()))?;
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditDecision;
    use chrono::Utc;
    use overwatch_core::RiskLevel;

    fn entry(tool: &str) -> AuditEntry {
        AuditEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now(),
            server: None,
            tool: tool.to_string(),
            args: None,
            risk_level: RiskLevel::Read,
            decision: AuditDecision::Allowed,
            session_id: None,
            duration_ms: None,
            error: None,
        }
    }

    #[test]
    fn test_append_and_scan() {
        let storage = MemoryAuditStorage::new();
        storage.append(entry("a")).unwrap();
        storage.append(entry("b")).unwrap();

        let all = storage.scan(&AuditFilters::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].tool, "a");
        assert_eq!(all[1].tool, "b");
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let storage = MemoryAuditStorage::with_retention(2);
        storage.append(entry("a")).unwrap();
        storage.append(entry("b")).unwrap();
        storage.append(entry("c")).unwrap();

        let all = storage.scan(&AuditFilters::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].tool, "b");
        assert_eq!(all[1].tool, "c");
    }

    #[test]
    fn test_scan_applies_filters() {
        let storage = MemoryAuditStorage::new();
        storage.append(entry("read_file")).unwrap();
        storage.append(entry("write_file")).unwrap();

        let filters = AuditFilters {
            tool: Some("read_file".to_string()),
            ..AuditFilters::default()
        };
        let found = storage.scan(&filters).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tool, "read_file");
    }
}
