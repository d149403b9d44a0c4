//! MonitorEngine - wiring and the management surface
//!
//! The engine owns the component graph (registry, store, provider, actors)
//! and exposes the operations the web layer consumes: target CRUD, status
//! and history queries, and system status. Only configuration errors surface
//! synchronously from these calls; everything the pipeline does is absorbed
//! into alerts and logs.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::actors::messages::AlertEvent;
use crate::actors::notifier::NotifierHandle;
use crate::actors::pipeline::PipelineContext;
use crate::actors::retention::RetentionHandle;
use crate::actors::scheduler::SchedulerHandle;
use crate::alerts::{Alert, AlertEngine};
use crate::detector::DetectorPolicy;
use crate::notify::{NotificationTransport, TransportRegistry};
use crate::orchestrator::ScanOrchestrator;
use crate::provider::ScanProvider;
use crate::registry::{
    MonitoringTarget, RegistryResult, TargetConfig, TargetRegistry, TargetUpdate,
};
use crate::storage::schema::SnapshotSummary;
use crate::storage::{StorageBackend, StorageResult};

/// Alert broadcast channel capacity. Lagging subscribers drop alerts rather
/// than backpressure the pipeline.
const ALERT_CHANNEL_CAPACITY: usize = 256;

/// How many snapshots feed the long-run average in `get_target_status`
const TREND_WINDOW: usize = 30;

/// How many snapshots feed the recent average
const RECENT_WINDOW: usize = 5;

/// Recent average must differ from the long-run average by more than this
/// to count as a trend
const TREND_MARGIN: f64 = 2.0;

/// Direction a target's score is moving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreTrend {
    Improving,
    Stable,
    Declining,
    /// Not enough history to tell
    Unknown,
}

/// Status summary for one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub target_id: Uuid,
    pub trend: ScoreTrend,
    pub average_score: Option<f64>,
    pub recent_average_score: Option<f64>,
    pub open_alert_count: usize,
    pub last_scan_at: Option<DateTime<Utc>>,
}

/// Status summary for the whole engine
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub active_targets: usize,
    pub total_scans: u64,
    pub open_alerts: usize,
    pub scheduler_running: bool,
}

/// Tuning knobs for `MonitorEngine::start`
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub scan_timeout: Duration,
    pub tick_interval: Duration,
    pub max_concurrent_scans: usize,
    pub retention_days: u32,
    pub cleanup_interval_hours: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_secs(60),
            max_concurrent_scans: 8,
            retention_days: 90,
            cleanup_interval_hours: 24,
        }
    }
}

/// The assembled monitoring engine
pub struct MonitorEngine {
    registry: Arc<TargetRegistry>,
    store: Arc<dyn StorageBackend>,
    scheduler: SchedulerHandle,
    notifier: NotifierHandle,
    retention: RetentionHandle,
}

impl MonitorEngine {
    /// Wire the components together and start all actors.
    pub fn start(
        provider: Arc<dyn ScanProvider>,
        store: Arc<dyn StorageBackend>,
        transports: Arc<TransportRegistry>,
        options: EngineOptions,
    ) -> Self {
        let registry = Arc::new(TargetRegistry::new());
        let (alert_tx, alert_rx) = broadcast::channel::<AlertEvent>(ALERT_CHANNEL_CAPACITY);

        let ctx = Arc::new(PipelineContext {
            registry: registry.clone(),
            store: store.clone(),
            orchestrator: ScanOrchestrator::new(
                provider,
                registry.clone(),
                options.scan_timeout,
            ),
            detector: DetectorPolicy::default(),
            alert_engine: AlertEngine::new(store.clone()),
            alert_tx,
            total_scans: AtomicU64::new(0),
        });

        let scheduler =
            SchedulerHandle::spawn(ctx, options.tick_interval, options.max_concurrent_scans);
        let notifier = NotifierHandle::spawn(transports, store.clone(), alert_rx);
        let retention = RetentionHandle::spawn(
            store.clone(),
            options.retention_days,
            options.cleanup_interval_hours,
        );

        info!("monitoring engine started");

        Self {
            registry,
            store,
            scheduler,
            notifier,
            retention,
        }
    }

    /// Shut the engine down: scheduler first (cancelling in-flight scans and
    /// letting computed snapshots persist), then the auxiliary actors, then
    /// the store.
    pub async fn shutdown(&self) {
        info!("shutting down monitoring engine");

        self.scheduler.shutdown().await;
        self.notifier.shutdown().await;
        self.retention.shutdown().await;

        if let Err(e) = self.store.close().await {
            debug!("error closing store: {e}");
        }
    }

    // ========================================================================
    // Management surface
    // ========================================================================

    /// Register a new target for monitoring.
    pub async fn register_target(&self, config: TargetConfig) -> RegistryResult<Uuid> {
        self.registry.register(config).await
    }

    /// Apply a partial update to a target.
    pub async fn update_target(
        &self,
        target_id: Uuid,
        update: TargetUpdate,
    ) -> RegistryResult<bool> {
        self.registry.update(target_id, update).await
    }

    /// Remove a target from active scheduling. Soft delete: scan history and
    /// alerts stay queryable for the audit trail.
    pub async fn remove_target(&self, target_id: Uuid) -> RegistryResult<bool> {
        self.registry.disable(target_id).await
    }

    pub async fn get_target(&self, target_id: Uuid) -> RegistryResult<MonitoringTarget> {
        self.registry.get(target_id).await
    }

    /// Run a target's pipeline immediately, bypassing its cadence.
    pub async fn trigger_scan(&self, target_id: Uuid) -> anyhow::Result<()> {
        self.scheduler.trigger_now(target_id).await
    }

    /// Register a custom notification transport under a channel id.
    pub async fn register_transport(
        &self,
        channel_id: impl Into<String>,
        transport: Arc<dyn NotificationTransport>,
    ) {
        self.notifier.register_transport(channel_id, transport).await;
    }

    /// Score trend and alert summary for one target.
    pub async fn get_target_status(&self, target_id: Uuid) -> anyhow::Result<TargetStatus> {
        let target = self.registry.get(target_id).await?;
        let history = self.store.latest_snapshots(target_id, TREND_WINDOW).await?;
        let open_alert_count = self.store.open_alert_count(Some(target_id)).await?;

        let average_score = mean(history.iter().map(|s| s.overall_score));
        let recent_average_score = mean(history.iter().take(RECENT_WINDOW).map(|s| s.overall_score));

        let trend = match (recent_average_score, average_score) {
            (Some(recent), Some(average)) if history.len() >= RECENT_WINDOW => {
                if recent > average + TREND_MARGIN {
                    ScoreTrend::Improving
                } else if recent < average - TREND_MARGIN {
                    ScoreTrend::Declining
                } else {
                    ScoreTrend::Stable
                }
            }
            _ => ScoreTrend::Unknown,
        };

        Ok(TargetStatus {
            target_id,
            trend,
            average_score,
            recent_average_score,
            open_alert_count,
            last_scan_at: target.last_scan_at,
        })
    }

    /// Snapshot summaries for a target, newest first.
    pub async fn get_history(
        &self,
        target_id: Uuid,
        limit: usize,
    ) -> StorageResult<Vec<SnapshotSummary>> {
        let snapshots = self.store.latest_snapshots(target_id, limit).await?;
        Ok(snapshots.iter().map(SnapshotSummary::from).collect())
    }

    /// Alerts for one target, newest first.
    pub async fn get_alerts(
        &self,
        target_id: Uuid,
        open_only: bool,
    ) -> StorageResult<Vec<Alert>> {
        self.store.alerts_for_target(target_id, open_only).await
    }

    /// Alerts across all targets of one owner, newest first.
    pub async fn get_alerts_for_owner(
        &self,
        owner_id: &str,
        open_only: bool,
    ) -> StorageResult<Vec<Alert>> {
        let mut alerts = Vec::new();
        for target in self.registry.list_by_owner(owner_id).await {
            alerts.extend(self.store.alerts_for_target(target.id, open_only).await?);
        }
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    /// Engine-wide status.
    pub async fn get_system_status(&self) -> anyhow::Result<SystemStatus> {
        let scheduler_status = self.scheduler.status().await;
        let open_alerts = self.store.open_alert_count(None).await?;
        let active_targets = self.registry.list_active().await.len();

        Ok(SystemStatus {
            active_targets,
            total_scans: scheduler_status
                .as_ref()
                .map(|s| s.total_scans)
                .unwrap_or_default(),
            open_alerts,
            scheduler_running: scheduler_status.is_some(),
        })
    }
}

fn mean(scores: impl Iterator<Item = f64>) -> Option<f64> {
    let scores: Vec<f64> = scores.collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}
