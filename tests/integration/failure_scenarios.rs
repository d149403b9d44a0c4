//! Failure handling: provider errors, timeouts, dedup of failure alerts

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use compliance_monitoring::alerts::AlertType;
use compliance_monitoring::storage::{MemoryStore, StorageBackend};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::helpers::*;

#[tokio::test]
async fn failing_provider_raises_scan_failed_alert() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scan"))
        .respond_with(ResponseTemplate::new(503))
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

    // No snapshot materialized for the failed attempt
    assert_eq!(store.count_snapshots().await.unwrap(), 0);

    let alerts = engine.get_alerts(target_id, true).await.unwrap();
    assert_eq!(alerts[0].alert_type, AlertType::ScanFailed);

    // last_scan_at still advanced: failures respect cadence
    let status = engine.get_target_status(target_id).await.unwrap();
    assert!(status.last_scan_at.is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn repeated_failures_do_not_stack_alerts() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scan"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let engine = start_engine_against(&mock_server.uri(), store.clone());

    let target_id = engine
        .register_target(create_test_target_config("https://example.com", 80.0))
        .await
        .unwrap();

    // Two consecutive failed scans
    for attempt in 1..=2u64 {
        trigger_accepted(&engine, target_id).await;
        let e = &engine;
        wait_for(move || async move {
            e.get_system_status().await.unwrap().total_scans == attempt
        })
        .await;
    }

    // Exactly one open scan_failed alert, not two
    let alerts = engine.get_alerts(target_id, true).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::ScanFailed);

    engine.shutdown().await;
}

#[tokio::test]
async fn recovery_resolves_scan_failed_and_stores_snapshot() {
    let mock_server = MockServer::start().await;

    // Fail once, then succeed
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    Mock::given(method("GET"))
        .and(path("/scan"))
        .respond_with(move |_req: &wiremock::Request| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(500)
            } else {
                ResponseTemplate::new(200)
                    .set_body_json(create_mock_scan_json(95.0, 800, true, &[]))
            }
        })
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

    trigger_accepted(&engine, target_id).await;
    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.count_snapshots().await.unwrap() == 1 }
    })
    .await;

    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.open_alert_count(Some(target_id)).await.unwrap() == 0 }
    })
    .await;

    // The failure is still in the audit trail, resolved
    let all_alerts = engine.get_alerts(target_id, false).await.unwrap();
    assert_eq!(all_alerts.len(), 1);
    assert!(all_alerts[0].resolved_at.is_some());

    engine.shutdown().await;
}

#[tokio::test]
async fn hung_provider_is_classified_as_scan_failure() {
    let mock_server = MockServer::start().await;

    // Longer than the engine's 2s scan timeout
    Mock::given(method("GET"))
        .and(path("/scan"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(create_mock_scan_json(90.0, 900, true, &[]))
                .set_delay(Duration::from_secs(10)),
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

    let alerts = engine.get_alerts(target_id, true).await.unwrap();
    assert_eq!(alerts[0].alert_type, AlertType::ScanFailed);
    assert_eq!(store.count_snapshots().await.unwrap(), 0);

    engine.shutdown().await;
}
