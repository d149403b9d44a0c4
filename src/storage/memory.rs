//! In-memory storage backend (no persistence)
//!
//! Snapshots live in per-target deques, alerts in a flat map. This backend
//! is the default when no storage is configured and the backend every test
//! runs against.
//!
//! ## Limitations
//!
//! - **No persistence**: all data lost on restart
//! - **Bounded capacity**: each target keeps at most `MAX_SNAPSHOTS_PER_TARGET`

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::alerts::{Alert, AlertType};
use crate::snapshot::ScanSnapshot;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};

/// Maximum snapshots to keep in memory per target
const MAX_SNAPSHOTS_PER_TARGET: usize = 1000;

#[derive(Default)]
struct Inner {
    /// Snapshots grouped by target, oldest first
    snapshots: HashMap<Uuid, VecDeque<ScanSnapshot>>,

    /// All alerts by id
    alerts: HashMap<Uuid, Alert>,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn append_snapshot(
        &self,
        snapshot: ScanSnapshot,
    ) -> StorageResult<Option<ScanSnapshot>> {
        let mut inner = self.inner.write().await;
        let history = inner.snapshots.entry(snapshot.target_id).or_default();

        let previous = history.back().cloned();
        if let Some(latest) = &previous {
            if snapshot.timestamp < latest.timestamp {
                return Err(StorageError::OutOfOrder {
                    target_id: snapshot.target_id,
                    latest: latest.timestamp,
                    rejected: snapshot.timestamp,
                });
            }
        }

        history.push_back(snapshot);
        if history.len() > MAX_SNAPSHOTS_PER_TARGET {
            history.pop_front();
        }

        Ok(previous)
    }

    async fn latest_snapshots(
        &self,
        target_id: Uuid,
        limit: usize,
    ) -> StorageResult<Vec<ScanSnapshot>> {
        let inner = self.inner.read().await;
        Ok(inner
            .snapshots
            .get(&target_id)
            .map(|deque| deque.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn snapshot_history(
        &self,
        target_id: Uuid,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<ScanSnapshot>> {
        let inner = self.inner.read().await;
        Ok(inner
            .snapshots
            .get(&target_id)
            .map(|deque| {
                deque
                    .iter()
                    .rev()
                    .filter(|s| since.is_none_or(|since| s.timestamp >= since))
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_snapshots(&self) -> StorageResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.snapshots.values().map(|d| d.len() as u64).sum())
    }

    async fn prune_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut inner = self.inner.write().await;
        let mut deleted = 0;

        for history in inner.snapshots.values_mut() {
            // The most recent snapshot survives regardless of age: it is the
            // diff baseline for the next scan.
            while history.len() > 1
                && history
                    .front()
                    .is_some_and(|oldest| oldest.timestamp < before)
            {
                history.pop_front();
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    async fn insert_alert(&self, alert: Alert) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.alerts.insert(alert.alert_id, alert);
        Ok(())
    }

    async fn find_open_alert(
        &self,
        target_id: Uuid,
        alert_type: AlertType,
    ) -> StorageResult<Option<Alert>> {
        let inner = self.inner.read().await;
        Ok(inner
            .alerts
            .values()
            .find(|a| a.target_id == target_id && a.alert_type == alert_type && a.is_open())
            .cloned())
    }

    async fn resolve_alert(&self, alert_id: Uuid, at: DateTime<Utc>) -> StorageResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.alerts.get_mut(&alert_id) {
            Some(alert) if alert.is_open() => {
                alert.resolved_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_alert_notified(&self, alert_id: Uuid) -> StorageResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.alerts.get_mut(&alert_id) {
            Some(alert) => {
                alert.notification_sent = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn alerts_for_target(
        &self,
        target_id: Uuid,
        open_only: bool,
    ) -> StorageResult<Vec<Alert>> {
        let inner = self.inner.read().await;
        let mut alerts: Vec<Alert> = inner
            .alerts
            .values()
            .filter(|a| a.target_id == target_id && (!open_only || a.is_open()))
            .cloned()
            .collect();

        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    async fn open_alert_count(&self, target_id: Option<Uuid>) -> StorageResult<usize> {
        let inner = self.inner.read().await;
        Ok(inner
            .alerts
            .values()
            .filter(|a| a.is_open() && target_id.is_none_or(|id| a.target_id == id))
            .count())
    }

    async fn prune_resolved_alerts(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut inner = self.inner.write().await;
        let before_count = inner.alerts.len();

        inner
            .alerts
            .retain(|_, a| a.is_open() || a.created_at >= before);

        Ok(before_count - inner.alerts.len())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let inner = self.inner.read().await;
        let total: usize = inner.snapshots.values().map(|d| d.len()).sum();

        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_snapshots".to_string(), total.to_string()),
                ("total_alerts".to_string(), inner.alerts.len().to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let inner = self.inner.read().await;
        let total: usize = inner.snapshots.values().map(|d| d.len()).sum();

        Ok(format!(
            "In-Memory: {} snapshots across {} targets, {} alerts",
            total,
            inner.snapshots.len(),
            inner.alerts.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
