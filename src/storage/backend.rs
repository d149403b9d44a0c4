//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::alerts::{Alert, AlertType};
use crate::snapshot::ScanSnapshot;

use super::error::StorageResult;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// Backends own the append-only snapshot history and the alert table. The
/// trait is designed to be:
///
/// - **Async**: all methods are async for compatibility with Tokio
/// - **Linearizable per target**: writes for one target behave as if applied
///   in order; `append_snapshot` enforces timestamp ordering as a guard
/// - **Maintainable**: health checks and pruning operations
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across the
/// scheduler, pipeline tasks, and the retention job.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Snapshot operations
    // ========================================================================

    /// Append a snapshot to its target's history and return the previous
    /// latest snapshot for that target (the change detector's other input).
    ///
    /// Rejects snapshots older than the target's current latest with
    /// `StorageError::OutOfOrder`. Equal timestamps are accepted
    /// (non-decreasing order).
    async fn append_snapshot(&self, snapshot: ScanSnapshot)
    -> StorageResult<Option<ScanSnapshot>>;

    /// The N most recent snapshots for a target, newest first.
    async fn latest_snapshots(
        &self,
        target_id: Uuid,
        limit: usize,
    ) -> StorageResult<Vec<ScanSnapshot>>;

    /// Snapshot history for a target, newest first, optionally bounded by a
    /// lower timestamp and a result limit.
    async fn snapshot_history(
        &self,
        target_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ScanSnapshot>>;

    /// Total snapshots stored across all targets.
    async fn count_snapshots(&self) -> StorageResult<u64>;

    /// Delete snapshots older than `before`, keeping each target's most
    /// recent snapshot regardless of age. Returns the number deleted.
    async fn prune_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    // ========================================================================
    // Alert operations
    // ========================================================================

    /// Persist a newly created alert.
    async fn insert_alert(&self, alert: Alert) -> StorageResult<()>;

    /// The unresolved alert of this type for this target, if one exists.
    ///
    /// This is the dedup lookup: at most one open alert per
    /// `(target_id, alert_type)` exists at any time.
    async fn find_open_alert(
        &self,
        target_id: Uuid,
        alert_type: AlertType,
    ) -> StorageResult<Option<Alert>>;

    /// Mark an alert resolved at `at`. Returns false if the alert does not
    /// exist or was already resolved.
    async fn resolve_alert(&self, alert_id: Uuid, at: DateTime<Utc>) -> StorageResult<bool>;

    /// Record that at least one notification channel accepted this alert.
    async fn mark_alert_notified(&self, alert_id: Uuid) -> StorageResult<bool>;

    /// Alerts for a target, newest first. `open_only` filters to unresolved.
    async fn alerts_for_target(
        &self,
        target_id: Uuid,
        open_only: bool,
    ) -> StorageResult<Vec<Alert>>;

    /// Count of unresolved alerts, optionally restricted to one target.
    async fn open_alert_count(&self, target_id: Option<Uuid>) -> StorageResult<usize>;

    /// Delete resolved alerts older than `before`. Open alerts are never
    /// touched. Returns the number deleted.
    async fn prune_resolved_alerts(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend is
    /// operational (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Get backend-specific statistics
    ///
    /// Returns human-readable stats about the backend
    /// (e.g., "SQLite: 120k snapshots, 450MB on disk").
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    ///
    /// Gracefully shuts down the backend, closing connections
    /// and flushing any pending writes.
    async fn close(&self) -> StorageResult<()>;
}
