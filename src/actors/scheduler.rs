//! SchedulerActor - drives the whole engine
//!
//! A single periodic ticker selects all enabled targets whose cadence has
//! elapsed and spawns one pipeline task per target. Two mechanisms bound the
//! work:
//!
//! - a global `Semaphore` caps concurrently running scans, so one slow batch
//!   cannot flood the network
//! - an in-flight set gives per-target mutual exclusion: a target is never
//!   scanned twice concurrently, however slow its pipeline is
//!
//! There is no retry loop and no permanent failure state. A failed target
//! cycles back to idle and is retried at its next cadence tick; the cadence
//! itself is the backoff.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio::time::interval;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use super::messages::{SchedulerCommand, SchedulerStatus};
use super::pipeline::{self, PipelineContext};

/// How long the drain phase waits for one in-flight pipeline on shutdown.
/// Slightly above the scan timeout so cancelled scans can finish persisting.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(35);

/// Actor that schedules pipeline runs for all targets
pub struct SchedulerActor {
    ctx: Arc<PipelineContext>,

    /// Tick interval (shortest supported cadence unit)
    tick_interval: Duration,

    /// Global bound on concurrent scans
    semaphore: Arc<Semaphore>,

    /// Targets with a pipeline run in flight
    in_flight: HashSet<Uuid>,

    /// Completion notifications from pipeline tasks
    done_tx: mpsc::UnboundedSender<Uuid>,
    done_rx: mpsc::UnboundedReceiver<Uuid>,

    /// Shutdown signal observed by in-flight pipelines
    shutdown_tx: watch::Sender<bool>,

    /// Command receiver
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl SchedulerActor {
    fn new(
        ctx: Arc<PipelineContext>,
        tick_interval: Duration,
        max_concurrent_scans: usize,
        command_rx: mpsc::Receiver<SchedulerCommand>,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            ctx,
            tick_interval,
            semaphore: Arc::new(Semaphore::new(max_concurrent_scans)),
            in_flight: HashSet::new(),
            done_tx,
            done_rx,
            shutdown_tx,
            command_rx,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting scheduler (tick {:?}, {} scan slots)",
            self.tick_interval,
            self.semaphore.available_permits()
        );

        let mut ticker = interval(self.tick_interval);

        loop {
            tokio::select! {
                // Timer tick - schedule everything that is due
                _ = ticker.tick() => {
                    self.schedule_due_targets().await;
                }

                // A pipeline task finished
                Some(target_id) = self.done_rx.recv() => {
                    trace!("pipeline for {} finished", target_id);
                    self.in_flight.remove(&target_id);
                }

                // Handle commands
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::TriggerNow { target_id, respond_to } => {
                            let result = self.trigger_now(target_id).await;
                            let _ = respond_to.send(result);
                        }

                        SchedulerCommand::GetStatus { respond_to } => {
                            let _ = respond_to.send(SchedulerStatus {
                                running: true,
                                in_flight: self.in_flight.len(),
                                total_scans: self.ctx.total_scans.load(Ordering::Relaxed),
                                tick_interval: self.tick_interval,
                            });
                        }

                        SchedulerCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                // Command channel closed
                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        self.drain().await;
        debug!("scheduler stopped");
    }

    /// Spawn pipelines for every enabled target whose cadence elapsed.
    async fn schedule_due_targets(&mut self) {
        let now = chrono::Utc::now();
        let targets = self.ctx.registry.list_active().await;

        trace!("tick: {} active targets", targets.len());

        for target in targets {
            if !target.is_due(now) {
                continue;
            }
            if self.in_flight.contains(&target.id) {
                trace!("{} still in flight, skipping", target.id);
                continue;
            }

            self.spawn_pipeline(target.id);
        }
    }

    /// Immediately run one target's pipeline, bypassing its cadence.
    async fn trigger_now(&mut self, target_id: Uuid) -> anyhow::Result<()> {
        if self.in_flight.contains(&target_id) {
            anyhow::bail!("a scan for {target_id} is already in flight");
        }

        // Fails fast on unknown targets
        self.ctx
            .registry
            .get(target_id)
            .await
            .context("cannot trigger scan")?;

        self.spawn_pipeline(target_id);
        Ok(())
    }

    fn spawn_pipeline(&mut self, target_id: Uuid) {
        self.in_flight.insert(target_id);

        let ctx = self.ctx.clone();
        let semaphore = self.semaphore.clone();
        let done_tx = self.done_tx.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            // The in-flight marker is already set, so a queued target is
            // never scheduled twice while waiting for a slot.
            match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    pipeline::run(ctx, target_id, shutdown_rx).await;
                }
                Err(_) => {
                    trace!("semaphore closed, skipping scan of {target_id}");
                }
            }

            let _ = done_tx.send(target_id);
        });
    }

    /// Cancel in-flight provider calls and wait for pipelines to finish
    /// persisting what they already computed.
    async fn drain(&mut self) {
        let _ = self.shutdown_tx.send(true);

        while !self.in_flight.is_empty() {
            match tokio::time::timeout(DRAIN_TIMEOUT, self.done_rx.recv()).await {
                Ok(Some(target_id)) => {
                    self.in_flight.remove(&target_id);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "{} pipelines did not finish within {:?}, abandoning",
                        self.in_flight.len(),
                        DRAIN_TIMEOUT
                    );
                    break;
                }
            }
        }
    }
}

/// Handle for controlling the SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor
    pub fn spawn(
        ctx: Arc<PipelineContext>,
        tick_interval: Duration,
        max_concurrent_scans: usize,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor::new(ctx, tick_interval, max_concurrent_scans, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a target's pipeline immediately, bypassing its cadence
    pub async fn trigger_now(&self, target_id: Uuid) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::TriggerNow {
                target_id,
                respond_to: tx,
            })
            .await
            .context("failed to send TriggerNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Get current scheduler state. `None` when the scheduler is stopped.
    pub async fn status(&self) -> Option<SchedulerStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStatus { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Shutdown the scheduler, draining in-flight pipelines
    pub async fn shutdown(&self) {
        let _ = self.sender.send(SchedulerCommand::Shutdown).await;
    }
}
