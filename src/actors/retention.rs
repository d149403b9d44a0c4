//! RetentionActor - prunes old snapshots and resolved alerts
//!
//! Runs once on startup and then at a fixed interval, independently of the
//! live pipeline. Open alerts and each target's most recent snapshot are
//! never pruned; the storage backend enforces both.
//!
//! Cleanup errors are logged and retried on the next interval - they never
//! stop the actor.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, instrument, trace};

use crate::storage::StorageBackend;

use super::messages::{RetentionCommand, RetentionStats};

/// Actor that enforces the retention window
pub struct RetentionActor {
    store: Arc<dyn StorageBackend>,

    /// Data older than this is eligible for pruning
    retention_days: u32,

    /// How often cleanup runs
    cleanup_interval: Duration,

    command_rx: mpsc::Receiver<RetentionCommand>,

    stats: RetentionStats,
}

impl RetentionActor {
    fn new(
        store: Arc<dyn StorageBackend>,
        retention_days: u32,
        cleanup_interval_hours: u32,
        command_rx: mpsc::Receiver<RetentionCommand>,
    ) -> Self {
        Self {
            store,
            retention_days,
            cleanup_interval: Duration::from_secs(cleanup_interval_hours as u64 * 3600),
            command_rx,
            stats: RetentionStats::default(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting retention actor ({} day window, every {:?})",
            self.retention_days, self.cleanup_interval
        );

        let mut cleanup_interval = time::interval(self.cleanup_interval);

        loop {
            tokio::select! {
                // First tick fires immediately: initial cleanup on startup
                _ = cleanup_interval.tick() => {
                    self.run_cleanup().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        RetentionCommand::RunNow { respond_to } => {
                            debug!("manual cleanup requested");
                            self.run_cleanup().await;
                            let _ = respond_to.send(self.stats.clone());
                        }

                        RetentionCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats.clone());
                        }

                        RetentionCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    break;
                }
            }
        }

        debug!("retention actor stopped");
    }

    /// One cleanup pass over snapshots and resolved alerts.
    async fn run_cleanup(&mut self) {
        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days as i64);

        debug!("running retention cleanup (deleting data before {cutoff})");

        match self.store.prune_snapshots(cutoff).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!("retention cleanup: deleted {deleted} old snapshots");
                } else {
                    trace!("retention cleanup: no old snapshots to delete");
                }
                self.stats.total_snapshots_deleted += deleted as u64;
            }
            Err(e) => {
                error!("failed to prune snapshots: {e}");
                // Retried on the next interval
            }
        }

        match self.store.prune_resolved_alerts(cutoff).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!("retention cleanup: deleted {deleted} resolved alerts");
                } else {
                    trace!("retention cleanup: no resolved alerts to delete");
                }
                self.stats.total_alerts_deleted += deleted as u64;
            }
            Err(e) => {
                error!("failed to prune alerts: {e}");
            }
        }

        self.stats.last_run = Some(Utc::now());
    }
}

/// Handle for controlling the RetentionActor
#[derive(Clone)]
pub struct RetentionHandle {
    sender: mpsc::Sender<RetentionCommand>,
}

impl RetentionHandle {
    /// Spawn a new retention actor
    pub fn spawn(
        store: Arc<dyn StorageBackend>,
        retention_days: u32,
        cleanup_interval_hours: u32,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = RetentionActor::new(store, retention_days, cleanup_interval_hours, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a cleanup pass immediately and return the cumulative stats
    pub async fn run_now(&self) -> Option<RetentionStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RetentionCommand::RunNow { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Get cumulative cleanup statistics
    pub async fn stats(&self) -> Option<RetentionStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RetentionCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Shutdown the retention actor
    pub async fn shutdown(&self) {
        let _ = self.sender.send(RetentionCommand::Shutdown).await;
    }
}
