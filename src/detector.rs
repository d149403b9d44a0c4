//! Change detection between consecutive snapshots
//!
//! `detect` compares the two most recent snapshots of a target and emits a
//! list of typed changes. It is a pure function over its inputs: no storage,
//! no clock dependency beyond stamping `detected_at`, no per-target state.
//!
//! All thresholds live in one `DetectorPolicy` table. The defaults are the
//! global policy; they can be overridden per deployment by constructing the
//! detector with a different policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::trace;
use uuid::Uuid;

use crate::snapshot::ScanSnapshot;

/// Ordinal urgency of a change or alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// What kind of drift a change describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ScoreDelta,
    CategoryDelta,
    IssueSetChanged,
    PerformanceDelta,
    TlsChanged,
}

/// A detected difference between two consecutive snapshots of one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub target_id: Uuid,
    pub kind: ChangeKind,
    /// Set for `CategoryDelta`, `None` otherwise
    pub category: Option<String>,
    pub old_value: Value,
    pub new_value: Value,
    pub magnitude: f64,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
}

/// Threshold table for change detection
#[derive(Debug, Clone)]
pub struct DetectorPolicy {
    /// Minimum overall-score delta to report at all
    pub score_delta_min: f64,
    /// Overall-score delta at or above which the change is Medium
    pub score_delta_medium: f64,
    /// Overall-score delta at or above which the change is High
    pub score_delta_high: f64,

    /// Minimum per-category delta to report
    pub category_delta_min: f64,
    /// Per-category delta at or above which the change is High
    pub category_delta_high: f64,

    /// Minimum load-time delta (ms) to report
    pub performance_delta_min_ms: u64,
    /// Load-time *increase* (ms) above which the change is High
    pub performance_high_increase_ms: u64,
}

impl Default for DetectorPolicy {
    fn default() -> Self {
        Self {
            score_delta_min: 5.0,
            score_delta_medium: 10.0,
            score_delta_high: 20.0,
            category_delta_min: 10.0,
            category_delta_high: 30.0,
            performance_delta_min_ms: 1000,
            performance_high_increase_ms: 3000,
        }
    }
}

impl DetectorPolicy {
    /// Compare two consecutive snapshots of the same target.
    ///
    /// `previous` must be the older snapshot. The first scan of a target has
    /// no previous snapshot and therefore never produces changes - callers
    /// skip detection entirely in that case.
    pub fn detect(&self, previous: &ScanSnapshot, current: &ScanSnapshot) -> Vec<Change> {
        let mut changes = Vec::new();
        let detected_at = Utc::now();
        let target_id = current.target_id;

        // Overall score drift
        let score_delta = (current.overall_score - previous.overall_score).abs();
        if score_delta >= self.score_delta_min {
            let severity = if score_delta >= self.score_delta_high {
                Severity::High
            } else if score_delta >= self.score_delta_medium {
                Severity::Medium
            } else {
                Severity::Low
            };

            changes.push(Change {
                target_id,
                kind: ChangeKind::ScoreDelta,
                category: None,
                old_value: json!(previous.overall_score),
                new_value: json!(current.overall_score),
                magnitude: score_delta,
                severity,
                detected_at,
            });
        }

        // Per-category drift. A category missing from one snapshot diffs as 0.
        let mut categories: Vec<&String> = previous
            .category_scores
            .keys()
            .chain(current.category_scores.keys())
            .collect();
        categories.sort_unstable();
        categories.dedup();

        for category in categories {
            let old = previous.category_scores.get(category).copied().unwrap_or(0.0);
            let new = current.category_scores.get(category).copied().unwrap_or(0.0);
            let delta = (new - old).abs();

            if delta >= self.category_delta_min {
                let severity = if delta >= self.category_delta_high {
                    Severity::High
                } else {
                    Severity::Medium
                };

                changes.push(Change {
                    target_id,
                    kind: ChangeKind::CategoryDelta,
                    category: Some(category.clone()),
                    old_value: json!(old),
                    new_value: json!(new),
                    magnitude: delta,
                    severity,
                    detected_at,
                });
            }
        }

        // Issue-set drift: one O(1) fingerprint comparison
        if previous.issue_fingerprint != current.issue_fingerprint {
            changes.push(Change {
                target_id,
                kind: ChangeKind::IssueSetChanged,
                category: None,
                old_value: json!(previous.issue_fingerprint),
                new_value: json!(current.issue_fingerprint),
                magnitude: 0.0,
                severity: Severity::Medium,
                detected_at,
            });
        }

        // Load-time drift. Only an *increase* beyond the high threshold is High.
        let old_ms = previous.load_time_ms as i64;
        let new_ms = current.load_time_ms as i64;
        let perf_delta = new_ms - old_ms;
        if perf_delta.unsigned_abs() >= self.performance_delta_min_ms {
            let severity = if perf_delta > self.performance_high_increase_ms as i64 {
                Severity::High
            } else {
                Severity::Medium
            };

            changes.push(Change {
                target_id,
                kind: ChangeKind::PerformanceDelta,
                category: None,
                old_value: json!(previous.load_time_ms),
                new_value: json!(current.load_time_ms),
                magnitude: perf_delta.unsigned_abs() as f64,
                severity,
                detected_at,
            });
        }

        // TLS flipping from secure to insecure
        if previous.tls.is_secure() && !current.tls.is_secure() {
            changes.push(Change {
                target_id,
                kind: ChangeKind::TlsChanged,
                category: None,
                old_value: json!(true),
                new_value: json!(false),
                magnitude: 0.0,
                severity: Severity::High,
                detected_at,
            });
        }

        trace!(
            "detected {} changes for target {} between {} and {}",
            changes.len(),
            target_id,
            previous.timestamp,
            current.timestamp
        );

        changes
    }
}
