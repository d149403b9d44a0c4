//! Concurrency: global scan bound and per-target mutual exclusion

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use compliance_monitoring::provider::{ScanError, ScanProvider};
use compliance_monitoring::storage::{MemoryStore, StorageBackend};
use compliance_monitoring::{ScanResult, TlsInfo};

use super::helpers::*;

/// Provider that records its own concurrency high-water mark
struct GaugedProvider {
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
    delay: Duration,
}

impl GaugedProvider {
    fn new(delay: Duration) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            delay,
        }
    }
}

#[async_trait]
impl ScanProvider for GaugedProvider {
    async fn scan(&self, _url: &str, _timeout: Duration) -> Result<ScanResult, ScanError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(ScanResult {
            overall_score: 90.0,
            tls: TlsInfo {
                enabled: true,
                valid: true,
            },
            load_time_ms: 500,
            ..Default::default()
        })
    }
}

#[tokio::test]
async fn global_concurrency_limit_is_respected() {
    use compliance_monitoring::engine::{EngineOptions, MonitorEngine};
    use compliance_monitoring::notify::TransportRegistry;

    let provider = Arc::new(GaugedProvider::new(Duration::from_millis(100)));
    let store = Arc::new(MemoryStore::new());

    let engine = MonitorEngine::start(
        provider.clone(),
        store.clone(),
        Arc::new(TransportRegistry::new()),
        EngineOptions {
            scan_timeout: Duration::from_secs(5),
            // Fast tick so all targets are picked up immediately
            tick_interval: Duration::from_millis(20),
            max_concurrent_scans: 2,
            ..Default::default()
        },
    );

    for i in 0..10 {
        engine
            .register_target(create_test_target_config(
                &format!("https://site-{i}.example.com"),
                50.0,
            ))
            .await
            .unwrap();
    }

    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.count_snapshots().await.unwrap() == 10 }
    })
    .await;

    // All ten scanned, never more than two at once
    assert_eq!(provider.calls.load(Ordering::SeqCst), 10);
    assert!(
        provider.max_active.load(Ordering::SeqCst) <= 2,
        "scan concurrency exceeded the configured bound: {}",
        provider.max_active.load(Ordering::SeqCst)
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn only_one_pipeline_per_target_at_a_time() {
    let provider = Arc::new(GaugedProvider::new(Duration::from_millis(300)));
    let store = Arc::new(MemoryStore::new());
    let engine = start_engine(provider.clone(), store.clone());

    let target_id = engine
        .register_target(create_test_target_config("https://example.com", 50.0))
        .await
        .unwrap();

    // First trigger starts a slow scan; the second must be refused
    engine.trigger_scan(target_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = engine.trigger_scan(target_id).await;
    assert!(second.is_err(), "overlapping scan was not refused");

    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.count_snapshots().await.unwrap() == 1 }
    })
    .await;

    // Exactly one scan ran
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    // Once the first run finished, a new trigger is accepted again
    trigger_accepted(&engine, target_id).await;
    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.count_snapshots().await.unwrap() == 2 }
    })
    .await;

    engine.shutdown().await;
}

#[tokio::test]
async fn slow_target_does_not_starve_others() {
    use compliance_monitoring::engine::{EngineOptions, MonitorEngine};
    use compliance_monitoring::notify::TransportRegistry;

    /// One URL hangs forever, the rest answer quickly
    struct MixedProvider {
        fast_calls: AtomicUsize,
    }

    #[async_trait]
    impl ScanProvider for MixedProvider {
        async fn scan(&self, url: &str, _timeout: Duration) -> Result<ScanResult, ScanError> {
            if url.contains("stuck") {
                tokio::time::sleep(Duration::from_secs(60)).await;
                return Err(ScanError::transient("unreachable"));
            }
            self.fast_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ScanResult {
                overall_score: 90.0,
                tls: TlsInfo {
                    enabled: true,
                    valid: true,
                },
                ..Default::default()
            })
        }
    }

    let provider = Arc::new(MixedProvider {
        fast_calls: AtomicUsize::new(0),
    });
    let store = Arc::new(MemoryStore::new());

    let engine = MonitorEngine::start(
        provider.clone(),
        store.clone(),
        Arc::new(TransportRegistry::new()),
        EngineOptions {
            scan_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_millis(20),
            max_concurrent_scans: 4,
            ..Default::default()
        },
    );

    engine
        .register_target(create_test_target_config("https://stuck.example.com", 50.0))
        .await
        .unwrap();
    for i in 0..3 {
        engine
            .register_target(create_test_target_config(
                &format!("https://fast-{i}.example.com"),
                50.0,
            ))
            .await
            .unwrap();
    }

    // The three fast targets complete while the stuck one occupies its slot
    let s = store.clone();
    wait_for(|| {
        let s = s.clone();
        async move { s.count_snapshots().await.unwrap() == 3 }
    })
    .await;

    assert_eq!(provider.fast_calls.load(Ordering::SeqCst), 3);

    engine.shutdown().await;
}
