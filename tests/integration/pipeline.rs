//! End-to-end pipeline tests: scan → snapshot → diff → alert → notify

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use compliance_monitoring::alerts::{Alert, AlertType};
use compliance_monitoring::notify::NotificationTransport;
use compliance_monitoring::registry::{MonitoringTarget, TargetUpdate};
use compliance_monitoring::storage::{MemoryStore, StorageBackend};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::helpers::*;

#[tokio::test]
async fn scan_produces_snapshot_and_compliance_alert() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scan"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(create_mock_scan_json(70.0, 900, true, &[])),
        )
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = start_engine_against(&mock_server.uri(), store.clone());

    let target_id = engine
        .register_target(create_test_target_config("https://example.com", 80.0))
        .await
        .unwrap();

    engine.trigger_scan(target_id).await.unwrap();

    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.count_snapshots().await.unwrap() == 1 }
    })
    .await;

    // Snapshot landed
    let history = engine.get_history(target_id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].overall_score, 70.0);

    // Score 70 < threshold 80 raised exactly one compliance alert
    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.open_alert_count(Some(target_id)).await.unwrap() == 1 }
    })
    .await;

    let alerts = engine.get_alerts(target_id, true).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::ComplianceDrop);

    // last_scan_at advanced
    let status = engine.get_target_status(target_id).await.unwrap();
    assert!(status.last_scan_at.is_some());
    assert_eq!(status.open_alert_count, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn first_scan_never_produces_changes_later_scans_do() {
    let mock_server = MockServer::start().await;

    // First call scores 90, later calls 40 with a different issue set
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    Mock::given(method("GET"))
        .and(path("/scan"))
        .respond_with(move |_req: &wiremock::Request| {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst);
            let body = if n == 0 {
                create_mock_scan_json(90.0, 900, true, &["banner-late"])
            } else {
                create_mock_scan_json(40.0, 900, true, &["banner-missing"])
            };
            ResponseTemplate::new(200).set_body_json(body)
        })
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = start_engine_against(&mock_server.uri(), store.clone());

    let target_id = engine
        .register_target(create_test_target_config("https://example.com", 80.0))
        .await
        .unwrap();

    // First scan: compliant, no previous snapshot, no alerts
    engine.trigger_scan(target_id).await.unwrap();
    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.count_snapshots().await.unwrap() == 1 }
    })
    .await;
    assert_eq!(store.open_alert_count(Some(target_id)).await.unwrap(), 0);

    // Second scan: score collapses. Compliance drop plus critical drift
    // (score delta High + two category deltas High)
    trigger_accepted(&engine, target_id).await;
    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.count_snapshots().await.unwrap() == 2 }
    })
    .await;

    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.open_alert_count(Some(target_id)).await.unwrap() >= 2 }
    })
    .await;

    let alerts = engine.get_alerts(target_id, true).await.unwrap();
    let types: Vec<AlertType> = alerts.iter().map(|a| a.alert_type).collect();
    assert!(types.contains(&AlertType::ComplianceDrop));
    assert!(types.contains(&AlertType::CriticalChange));

    engine.shutdown().await;
}

#[tokio::test]
async fn threshold_update_applies_to_next_scan() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scan"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(create_mock_scan_json(70.0, 900, true, &[])),
        )
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = start_engine_against(&mock_server.uri(), store.clone());

    let target_id = engine
        .register_target(create_test_target_config("https://example.com", 80.0))
        .await
        .unwrap();

    engine.trigger_scan(target_id).await.unwrap();
    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.open_alert_count(Some(target_id)).await.unwrap() == 1 }
    })
    .await;

    // Lower the threshold below the observed score; the very next
    // evaluation resolves the open alert
    engine
        .update_target(
            target_id,
            TargetUpdate {
                compliance_threshold: Some(60.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    trigger_accepted(&engine, target_id).await;
    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.open_alert_count(Some(target_id)).await.unwrap() == 0 }
    })
    .await;

    engine.shutdown().await;
}

#[tokio::test]
async fn delivered_alert_is_marked_notified() {
    struct CountingTransport {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NotificationTransport for CountingTransport {
        async fn send(&self, _alert: &Alert, _target: &MonitoringTarget) -> anyhow::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scan"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(create_mock_scan_json(40.0, 900, true, &[])),
        )
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = start_engine_against(&mock_server.uri(), store.clone());

    let sent = Arc::new(AtomicUsize::new(0));
    engine
        .register_transport("ops", Arc::new(CountingTransport { sent: sent.clone() }))
        .await;

    let mut config = create_test_target_config("https://example.com", 80.0);
    config.notify_channels = vec!["ops".to_string()];
    let target_id = engine.register_target(config).await.unwrap();

    engine.trigger_scan(target_id).await.unwrap();

    let s = sent.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.load(Ordering::SeqCst) >= 1 }
    })
    .await;

    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move {
            s.alerts_for_target(target_id, true)
                .await
                .unwrap()
                .iter()
                .any(|a| a.notification_sent)
        }
    })
    .await;

    engine.shutdown().await;
}

#[tokio::test]
async fn removed_target_is_no_longer_scanned() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scan"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(create_mock_scan_json(90.0, 900, true, &[])),
        )
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = start_engine_against(&mock_server.uri(), store.clone());

    let target_id = engine
        .register_target(create_test_target_config("https://example.com", 80.0))
        .await
        .unwrap();

    engine.remove_target(target_id).await.unwrap();

    // Even an explicit trigger runs the pipeline, which skips disabled targets
    engine.trigger_scan(target_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(store.count_snapshots().await.unwrap(), 0);

    // History-preserving removal: the target record is still queryable
    let target = engine.get_target(target_id).await.unwrap();
    assert!(!target.enabled);

    engine.shutdown().await;
}
