//! Row shapes shared between backends and the management surface
//!
//! Snapshots and alerts are stored as their domain types; the summaries here
//! are the compact projections handed to the (out-of-scope) web layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::ScanSnapshot;

/// Compact view of a snapshot for history listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub scan_id: Uuid,
    pub target_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub overall_score: f64,
    pub issue_count: usize,
    pub load_time_ms: u64,
    pub tls_secure: bool,
}

impl From<&ScanSnapshot> for SnapshotSummary {
    fn from(snapshot: &ScanSnapshot) -> Self {
        Self {
            scan_id: snapshot.scan_id,
            target_id: snapshot.target_id,
            timestamp: snapshot.timestamp,
            overall_score: snapshot.overall_score,
            issue_count: snapshot.raw_result.issues.len(),
            load_time_ms: snapshot.load_time_ms,
            tls_secure: snapshot.tls.is_secure(),
        }
    }
}
