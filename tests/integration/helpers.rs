//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use compliance_monitoring::engine::{EngineOptions, MonitorEngine};
use compliance_monitoring::notify::TransportRegistry;
use compliance_monitoring::provider::{HttpScanProvider, ScanProvider};
use compliance_monitoring::registry::{Cadence, TargetConfig};
use compliance_monitoring::storage::StorageBackend;

pub fn create_test_target_config(url: &str, threshold: f64) -> TargetConfig {
    TargetConfig {
        url: url.to_string(),
        owner_id: "test-owner".to_string(),
        display: Some(format!("Test {url}")),
        cadence: Cadence::Hourly,
        compliance_threshold: threshold,
        notify_enabled: true,
        notify_channels: vec![],
    }
}

/// Engine with a slow tick: scans only happen through `trigger_scan` unless
/// a test opts into fast ticking.
pub fn start_engine(
    provider: Arc<dyn ScanProvider>,
    store: Arc<dyn StorageBackend>,
) -> MonitorEngine {
    MonitorEngine::start(
        provider,
        store,
        Arc::new(TransportRegistry::new()),
        EngineOptions {
            scan_timeout: Duration::from_secs(2),
            tick_interval: Duration::from_secs(3600),
            max_concurrent_scans: 4,
            ..Default::default()
        },
    )
}

/// Engine wired against a wiremock scan service.
pub fn start_engine_against(uri: &str, store: Arc<dyn StorageBackend>) -> MonitorEngine {
    start_engine(Arc::new(HttpScanProvider::new(uri, None)), store)
}

pub fn create_mock_scan_json(
    score: f64,
    load_time_ms: u64,
    tls_secure: bool,
    issue_ids: &[&str],
) -> serde_json::Value {
    let issues: Vec<serde_json::Value> = issue_ids
        .iter()
        .map(|id| {
            serde_json::json!({
                "category": "cookies",
                "severity": "medium",
                "stable_id": id
            })
        })
        .collect();

    serde_json::json!({
        "overall_score": score,
        "category_scores": { "cookies": score, "privacy": score },
        "issues": issues,
        "tls": { "enabled": tls_secure, "valid": tls_secure },
        "load_time_ms": load_time_ms
    })
}

/// Poll until `predicate` holds or the deadline passes.
pub async fn wait_for<F, Fut>(mut predicate: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if predicate().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}

/// Trigger a scan, retrying while the previous pipeline run is still
/// winding down (the in-flight marker clears asynchronously).
pub async fn trigger_accepted(engine: &MonitorEngine, target_id: uuid::Uuid) {
    for _ in 0..100 {
        if engine.trigger_scan(target_id).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("trigger was never accepted");
}
