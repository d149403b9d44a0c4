//! NotifierActor - fans alerts out to notification transports
//!
//! The actor subscribes to the pipeline's alert broadcast channel, so
//! delivery is structurally incapable of blocking or failing a scan: the
//! pipeline only ever does a non-blocking `send` into the channel.
//!
//! Each channel send is time-boxed. `notification_sent` is recorded only
//! when at least one channel succeeds; individual failures are logged and
//! swallowed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, instrument, trace, warn};

use crate::notify::{NotificationTransport, TransportRegistry, dispatch_alert};
use crate::storage::StorageBackend;

use super::messages::{AlertEvent, NotifierCommand};

/// Default per-channel delivery timeout
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Actor that delivers alerts to notification channels
pub struct NotifierActor {
    transports: Arc<TransportRegistry>,
    store: Arc<dyn StorageBackend>,
    alert_rx: broadcast::Receiver<AlertEvent>,
    command_rx: mpsc::Receiver<NotifierCommand>,
    send_timeout: Duration,
}

impl NotifierActor {
    pub fn new(
        transports: Arc<TransportRegistry>,
        store: Arc<dyn StorageBackend>,
        alert_rx: broadcast::Receiver<AlertEvent>,
        command_rx: mpsc::Receiver<NotifierCommand>,
    ) -> Self {
        Self {
            transports,
            store,
            alert_rx,
            command_rx,
            send_timeout: SEND_TIMEOUT,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting notifier actor");

        loop {
            tokio::select! {
                // Receive alert events
                result = self.alert_rx.recv() => {
                    match result {
                        Ok(event) => {
                            self.handle_alert(event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("notifier lagged, skipped {skipped} alerts");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            warn!("alert channel closed, shutting down");
                            break;
                        }
                    }
                }

                // Handle commands
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        NotifierCommand::RegisterTransport { channel_id, transport } => {
                            debug!("registering transport for channel '{channel_id}'");
                            self.transports.register(channel_id, transport).await;
                        }

                        NotifierCommand::Shutdown => {
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

        debug!("notifier actor stopped");
    }

    async fn handle_alert(&self, event: AlertEvent) {
        let AlertEvent { alert, target } = event;

        if !target.notify_enabled || target.notify_channels.is_empty() {
            trace!(
                "notifications disabled for {}, dropping {} alert",
                target.display_name(),
                alert.alert_type
            );
            return;
        }

        let sent = dispatch_alert(&self.transports, &alert, &target, self.send_timeout).await;

        if sent {
            if let Err(e) = self.store.mark_alert_notified(alert.alert_id).await {
                warn!("failed to record notification state: {e}");
            }
        } else {
            warn!(
                "no channel accepted {} alert for {}",
                alert.alert_type,
                target.display_name()
            );
        }
    }
}

/// Handle for controlling the NotifierActor
#[derive(Clone)]
pub struct NotifierHandle {
    sender: mpsc::Sender<NotifierCommand>,
}

impl NotifierHandle {
    /// Spawn a new notifier actor
    pub fn spawn(
        transports: Arc<TransportRegistry>,
        store: Arc<dyn StorageBackend>,
        alert_rx: broadcast::Receiver<AlertEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = NotifierActor::new(transports, store, alert_rx, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Register a custom transport under a channel id
    pub async fn register_transport(
        &self,
        channel_id: impl Into<String>,
        transport: Arc<dyn NotificationTransport>,
    ) {
        let _ = self
            .sender
            .send(NotifierCommand::RegisterTransport {
                channel_id: channel_id.into(),
                transport,
            })
            .await;
    }

    /// Shutdown the notifier actor
    pub async fn shutdown(&self) {
        let _ = self.sender.send(NotifierCommand::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Alert, AlertType};
    use crate::detector::Severity;
    use crate::registry::{Cadence, MonitoringTarget};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingTransport {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NotificationTransport for CountingTransport {
        async fn send(
            &self,
            _alert: &Alert,
            _target: &MonitoringTarget,
        ) -> anyhow::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_target(channels: Vec<String>, notify_enabled: bool) -> MonitoringTarget {
        MonitoringTarget {
            id: Uuid::new_v4(),
            url: "https://example.com".to_string(),
            owner_id: "owner-1".to_string(),
            display: None,
            cadence: Cadence::Daily,
            enabled: true,
            compliance_threshold: 80.0,
            notify_enabled,
            notify_channels: channels,
            last_scan_at: None,
        }
    }

    fn test_alert(target_id: Uuid) -> Alert {
        Alert {
            alert_id: Uuid::new_v4(),
            target_id,
            alert_type: AlertType::ComplianceDrop,
            severity: Severity::High,
            title: "test".to_string(),
            description: "test".to_string(),
            created_at: Utc::now(),
            resolved_at: None,
            notification_sent: false,
        }
    }

    #[tokio::test]
    async fn delivered_alert_is_marked_notified() {
        let store = Arc::new(MemoryStore::new());
        let transports = Arc::new(TransportRegistry::new());
        let sent = Arc::new(AtomicUsize::new(0));
        transports
            .register("ops", Arc::new(CountingTransport { sent: sent.clone() }))
            .await;

        let (alert_tx, alert_rx) = broadcast::channel(16);
        let handle = NotifierHandle::spawn(transports, store.clone(), alert_rx);

        let target = test_target(vec!["ops".to_string()], true);
        let alert = test_alert(target.id);
        let alert_id = alert.alert_id;

        use crate::storage::StorageBackend;
        store.insert_alert(alert.clone()).await.unwrap();
        alert_tx.send(AlertEvent { alert, target: target.clone() }).unwrap();

        // Give the actor time to deliver
        for _ in 0..50 {
            if sent.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(sent.load(Ordering::SeqCst), 1);
        let stored = store.alerts_for_target(target.id, false).await.unwrap();
        assert_eq!(stored[0].alert_id, alert_id);
        assert!(stored[0].notification_sent);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn notify_disabled_target_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let transports = Arc::new(TransportRegistry::new());
        let sent = Arc::new(AtomicUsize::new(0));
        transports
            .register("ops", Arc::new(CountingTransport { sent: sent.clone() }))
            .await;

        let (alert_tx, alert_rx) = broadcast::channel(16);
        let handle = NotifierHandle::spawn(transports, store.clone(), alert_rx);

        let target = test_target(vec!["ops".to_string()], false);
        let alert = test_alert(target.id);

        alert_tx.send(AlertEvent { alert, target }).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sent.load(Ordering::SeqCst), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn dynamically_registered_transport_receives_alerts() {
        let store = Arc::new(MemoryStore::new());
        let transports = Arc::new(TransportRegistry::new());

        let (alert_tx, alert_rx) = broadcast::channel(16);
        let handle = NotifierHandle::spawn(transports, store.clone(), alert_rx);

        let sent = Arc::new(AtomicUsize::new(0));
        handle
            .register_transport("pager", Arc::new(CountingTransport { sent: sent.clone() }))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let target = test_target(vec!["pager".to_string()], true);
        let alert = test_alert(target.id);

        use crate::storage::StorageBackend;
        store.insert_alert(alert.clone()).await.unwrap();
        alert_tx.send(AlertEvent { alert, target }).unwrap();

        for _ in 0..50 {
            if sent.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(sent.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }
}
