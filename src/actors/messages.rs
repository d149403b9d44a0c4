//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: Broadcast notifications published to multiple subscribers
//! 3. **Immutability**: All events are cloneable for multi-subscriber patterns

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::alerts::Alert;
use crate::notify::NotificationTransport;
use crate::registry::MonitoringTarget;

/// Event published when the alert engine creates a new alert
///
/// Carries the target alongside the alert so the notifier needs no registry
/// lookup; the target's channel list is frozen at evaluation time.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub alert: Alert,
    pub target: MonitoringTarget,
}

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a target's pipeline immediately, bypassing its cadence.
    ///
    /// Still subject to per-target exclusivity: fails if a run is in flight.
    TriggerNow {
        target_id: Uuid,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Get current scheduler state
    GetStatus {
        respond_to: oneshot::Sender<SchedulerStatus>,
    },

    /// Gracefully shut down: cancel in-flight provider calls, wait for
    /// already-computed snapshots to be persisted, then exit.
    Shutdown,
}

/// Current scheduler state
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub running: bool,
    pub in_flight: usize,
    pub total_scans: u64,
    pub tick_interval: Duration,
}

/// Commands that can be sent to the NotifierActor
pub enum NotifierCommand {
    /// Register a custom transport under a channel id (open set of kinds)
    RegisterTransport {
        channel_id: String,
        transport: Arc<dyn NotificationTransport>,
    },

    /// Gracefully shut down the notifier
    Shutdown,
}

/// Commands that can be sent to the RetentionActor
#[derive(Debug)]
pub enum RetentionCommand {
    /// Run a cleanup pass immediately
    RunNow {
        respond_to: oneshot::Sender<RetentionStats>,
    },

    /// Get cumulative cleanup statistics
    GetStats {
        respond_to: oneshot::Sender<RetentionStats>,
    },

    /// Gracefully shut down the retention job
    Shutdown,
}

/// Cumulative retention statistics
#[derive(Debug, Clone, Default)]
pub struct RetentionStats {
    pub last_run: Option<DateTime<Utc>>,
    pub total_snapshots_deleted: u64,
    pub total_alerts_deleted: u64,
}
