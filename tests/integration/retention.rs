//! Retention: pruning old history without touching live state

use std::sync::Arc;

use chrono::Utc;
use compliance_monitoring::actors::retention::RetentionHandle;
use compliance_monitoring::snapshot::ScanSnapshot;
use compliance_monitoring::storage::{MemoryStore, StorageBackend};
use compliance_monitoring::{ScanResult, TlsInfo};
use uuid::Uuid;

fn snapshot_at(target_id: Uuid, timestamp: chrono::DateTime<Utc>) -> ScanSnapshot {
    let mut snapshot = ScanSnapshot::from_result(
        target_id,
        timestamp,
        ScanResult {
            overall_score: 90.0,
            tls: TlsInfo {
                enabled: true,
                valid: true,
            },
            ..Default::default()
        },
    );
    snapshot.timestamp = timestamp;
    snapshot
}

#[tokio::test]
async fn retention_prunes_only_superseded_old_snapshots() {
    let store = Arc::new(MemoryStore::new());
    let stale_target = Uuid::new_v4();
    let fresh_target = Uuid::new_v4();

    // Stale target: three ancient snapshots
    let ancient = Utc::now() - chrono::Duration::days(365);
    for i in 0..3 {
        store
            .append_snapshot(snapshot_at(
                stale_target,
                ancient + chrono::Duration::days(i),
            ))
            .await
            .unwrap();
    }

    // Fresh target: recent history only
    for i in 0..3 {
        store
            .append_snapshot(snapshot_at(
                fresh_target,
                Utc::now() - chrono::Duration::hours(3 - i),
            ))
            .await
            .unwrap();
    }

    let handle = RetentionHandle::spawn(store.clone(), 90, 24);
    let stats = handle.run_now().await.unwrap();

    // Two of the stale target's three go; its latest stays as diff baseline
    assert_eq!(stats.total_snapshots_deleted, 2);
    assert_eq!(
        store.latest_snapshots(stale_target, 10).await.unwrap().len(),
        1
    );
    assert_eq!(
        store.latest_snapshots(fresh_target, 10).await.unwrap().len(),
        3
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn repeated_runs_are_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let target = Uuid::new_v4();

    let ancient = Utc::now() - chrono::Duration::days(365);
    store
        .append_snapshot(snapshot_at(target, ancient))
        .await
        .unwrap();
    store
        .append_snapshot(snapshot_at(target, ancient + chrono::Duration::hours(1)))
        .await
        .unwrap();

    let handle = RetentionHandle::spawn(store.clone(), 90, 24);

    let first = handle.run_now().await.unwrap();
    assert_eq!(first.total_snapshots_deleted, 1);

    // Nothing left to prune on the second pass
    let second = handle.run_now().await.unwrap();
    assert_eq!(second.total_snapshots_deleted, 1);

    handle.shutdown().await;
}
