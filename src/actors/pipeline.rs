//! One pipeline run: scan → append snapshot → detect changes → evaluate alerts
//!
//! Within a target the stages are strictly sequential; across targets runs
//! are independent tasks. A run aborts without partial writes when storage
//! fails, and a shutdown signal cancels the provider call (a snapshot that
//! was already computed is still persisted).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, instrument, trace};
use uuid::Uuid;

use crate::alerts::AlertEngine;
use crate::detector::DetectorPolicy;
use crate::orchestrator::ScanOrchestrator;
use crate::registry::TargetRegistry;
use crate::storage::StorageBackend;

use super::messages::AlertEvent;

/// Everything a pipeline task needs, shared across all tasks
pub struct PipelineContext {
    pub registry: Arc<TargetRegistry>,
    pub store: Arc<dyn StorageBackend>,
    pub orchestrator: ScanOrchestrator,
    pub detector: DetectorPolicy,
    pub alert_engine: AlertEngine,
    pub alert_tx: broadcast::Sender<AlertEvent>,
    /// Completed scan attempts (success or failure) since startup
    pub total_scans: AtomicU64,
}

/// Run the full pipeline for one target.
#[instrument(skip(ctx, shutdown_rx), fields(target_id = %target_id))]
pub async fn run(ctx: Arc<PipelineContext>, target_id: Uuid, mut shutdown_rx: watch::Receiver<bool>) {
    // The target may have been disabled between scheduling and execution.
    let target = match ctx.registry.get(target_id).await {
        Ok(target) if target.enabled => target,
        Ok(_) => {
            trace!("target disabled since scheduling, skipping");
            return;
        }
        Err(e) => {
            trace!("target vanished since scheduling: {e}");
            return;
        }
    };

    if *shutdown_rx.borrow() {
        trace!("shutting down, skipping scan");
        return;
    }

    // The provider call is the only long-blocking stage; it races the
    // shutdown signal. Everything after it runs to completion.
    let scan_result = tokio::select! {
        result = ctx.orchestrator.run_scan(&target) => result,
        _ = shutdown_rx.changed() => {
            debug!("scan of {} cancelled by shutdown", target.display_name());
            return;
        }
    };

    ctx.total_scans.fetch_add(1, Ordering::Relaxed);

    let alerts = match scan_result {
        Ok(snapshot) => {
            // Persist first; the previous latest comes back as diff input.
            let previous = match ctx.store.append_snapshot(snapshot.clone()).await {
                Ok(previous) => previous,
                Err(e) => {
                    // Infrastructure failure, not a compliance finding: the
                    // run aborts, the next cadence tick retries.
                    error!("storage error for {}: {}", target.display_name(), e);
                    return;
                }
            };

            // First scan of a target has nothing to diff against.
            let changes = match &previous {
                Some(previous) => ctx.detector.detect(previous, &snapshot),
                None => Vec::new(),
            };

            match ctx.alert_engine.evaluate(&target, &snapshot, &changes).await {
                Ok(alerts) => alerts,
                Err(e) => {
                    error!("alert evaluation failed for {}: {}", target.display_name(), e);
                    return;
                }
            }
        }
        Err(scan_error) => {
            match ctx.alert_engine.evaluate_failure(&target, &scan_error).await {
                Ok(alerts) => alerts,
                Err(e) => {
                    error!("alert evaluation failed for {}: {}", target.display_name(), e);
                    return;
                }
            }
        }
    };

    for alert in alerts {
        // No subscribers is fine; delivery is best-effort by design.
        let _ = ctx.alert_tx.send(AlertEvent {
            alert,
            target: target.clone(),
        });
    }
}
