//! Immutable scan snapshots and the issue-set fingerprint
//!
//! A `ScanSnapshot` is one observation of a target's compliance state. It is
//! never mutated after construction; history is append-only per target.
//!
//! The issue set is not diffed finding-by-finding. Instead each snapshot
//! carries an order-independent fingerprint over the normalized
//! `(category, severity, stable_id)` tuples of its issues, so "did the issue
//! set change" is an O(1) string comparison between snapshots. The trade-off
//! is deliberate: it detects *that* something moved, not *what*.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ScanIssue, ScanResult, TlsInfo};

/// One immutable observation of a target's compliance state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub scan_id: Uuid,
    pub target_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub overall_score: f64,
    pub category_scores: BTreeMap<String, f64>,
    /// Order-independent hash over the normalized issue set
    pub issue_fingerprint: String,
    pub tls: TlsInfo,
    pub load_time_ms: u64,
    /// The provider payload this snapshot was built from
    pub raw_result: ScanResult,
}

impl ScanSnapshot {
    /// Build a snapshot from a provider result.
    pub fn from_result(target_id: Uuid, timestamp: DateTime<Utc>, result: ScanResult) -> Self {
        Self {
            scan_id: Uuid::new_v4(),
            target_id,
            timestamp,
            overall_score: result.overall_score,
            category_scores: result.category_scores.clone(),
            issue_fingerprint: issue_fingerprint(&result.issues),
            tls: result.tls,
            load_time_ms: result.load_time_ms,
            raw_result: result,
        }
    }
}

/// Compute the order-independent fingerprint of an issue set.
///
/// Tuples are normalized (trimmed, category/severity lowercased), sorted and
/// deduplicated before hashing, so issue ordering and exact duplicates never
/// affect the digest.
pub fn issue_fingerprint(issues: &[ScanIssue]) -> String {
    let mut tuples: Vec<String> = issues
        .iter()
        .map(|issue| {
            format!(
                "{}\x1f{}\x1f{}",
                issue.category.trim().to_ascii_lowercase(),
                issue.severity.trim().to_ascii_lowercase(),
                issue.stable_id.trim(),
            )
        })
        .collect();

    tuples.sort_unstable();
    tuples.dedup();

    let mut hasher = blake3::Hasher::new();
    for tuple in &tuples {
        hasher.update(tuple.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}
