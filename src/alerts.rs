//! Alert engine - threshold rules, dedup, auto-resolution
//!
//! The engine is the only component that creates alerts. Rules are evaluated
//! independently, so one scan can raise several alerts at once.
//!
//! ## Dedup
//!
//! At most one *unresolved* alert exists per `(target_id, alert_type)`. A
//! rule whose alert is already open does not re-create it and does not
//! re-notify - a target stuck below threshold across many consecutive scans
//! produces exactly one open `compliance_drop` alert, not an alert storm.
//!
//! ## Auto-resolution
//!
//! On every successful evaluation, open alerts whose condition no longer
//! holds are resolved: the score climbing back over the threshold closes
//! `compliance_drop`, a successful scan closes `scan_failed`, and so on.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::detector::{Change, Severity};
use crate::provider::{FailureKind, ScanError};
use crate::registry::MonitoringTarget;
use crate::snapshot::ScanSnapshot;
use crate::storage::{StorageBackend, StorageResult};

/// What condition an alert describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ComplianceDrop,
    CriticalChange,
    ScanFailed,
    TlsIssue,
    PerformanceIssue,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ComplianceDrop => "compliance_drop",
            AlertType::CriticalChange => "critical_change",
            AlertType::ScanFailed => "scan_failed",
            AlertType::TlsIssue => "tls_issue",
            AlertType::PerformanceIssue => "performance_issue",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "compliance_drop" => Some(AlertType::ComplianceDrop),
            "critical_change" => Some(AlertType::CriticalChange),
            "scan_failed" => Some(AlertType::ScanFailed),
            "tls_issue" => Some(AlertType::TlsIssue),
            "performance_issue" => Some(AlertType::PerformanceIssue),
            _ => None,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An actionable, human-facing notification of a problem
///
/// Never mutated after creation except to mark resolution and delivery
/// state, and only through the storage API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub target_id: Uuid,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub notification_sent: bool,
}

impl Alert {
    fn new(
        target: &MonitoringTarget,
        alert_type: AlertType,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            target_id: target.id,
            alert_type,
            severity,
            title: title.into(),
            description: description.into(),
            created_at: Utc::now(),
            resolved_at: None,
            notification_sent: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Evaluates snapshots and changes against per-target thresholds
pub struct AlertEngine {
    store: Arc<dyn StorageBackend>,

    /// How many co-occurring High changes make a Critical `critical_change`.
    /// No single change ever carries Critical severity itself.
    critical_change_min_high: usize,

    /// Load-time ceiling (ms) before a `performance_issue` fires
    performance_limit_ms: u64,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self {
            store,
            critical_change_min_high: 2,
            performance_limit_ms: 5000,
        }
    }

    /// Override the Critical co-occurrence policy (deployment tuning).
    pub fn with_critical_change_min_high(mut self, min_high: usize) -> Self {
        self.critical_change_min_high = min_high;
        self
    }

    /// Evaluate a successful scan. Returns only newly created alerts -
    /// deduplicated ones are suppressed, resolved ones are closed in place.
    #[instrument(skip_all, fields(target = %target.display_name()))]
    pub async fn evaluate(
        &self,
        target: &MonitoringTarget,
        snapshot: &ScanSnapshot,
        changes: &[Change],
    ) -> StorageResult<Vec<Alert>> {
        let mut created = Vec::new();

        // A successful scan clears any open scan-failure alert.
        self.resolve_if_open(target.id, AlertType::ScanFailed).await?;

        // Rule: overall score below the target's threshold
        if snapshot.overall_score < target.compliance_threshold {
            self.raise(
                &mut created,
                target,
                AlertType::ComplianceDrop,
                Severity::High,
                format!("Compliance score below threshold: {}", target.display_name()),
                format!(
                    "Overall score {:.1} is below the configured threshold {:.1}",
                    snapshot.overall_score, target.compliance_threshold
                ),
            )
            .await?;
        } else {
            self.resolve_if_open(target.id, AlertType::ComplianceDrop)
                .await?;
        }

        // Rule: several High changes at once escalate to Critical
        let high_changes = changes
            .iter()
            .filter(|c| c.severity >= Severity::High)
            .count();
        if high_changes >= self.critical_change_min_high {
            self.raise(
                &mut created,
                target,
                AlertType::CriticalChange,
                Severity::Critical,
                format!("Critical drift detected: {}", target.display_name()),
                format!(
                    "{high_changes} high-severity changes detected in a single scan ({} changes total)",
                    changes.len()
                ),
            )
            .await?;
        } else {
            self.resolve_if_open(target.id, AlertType::CriticalChange)
                .await?;
        }

        // Rule: site not served over valid TLS
        if !snapshot.tls.is_secure() {
            let detail = if snapshot.tls.enabled {
                "certificate does not validate"
            } else {
                "site is not served over TLS"
            };
            self.raise(
                &mut created,
                target,
                AlertType::TlsIssue,
                Severity::High,
                format!("TLS problem: {}", target.display_name()),
                detail.to_string(),
            )
            .await?;
        } else {
            self.resolve_if_open(target.id, AlertType::TlsIssue).await?;
        }

        // Rule: page too slow
        if snapshot.load_time_ms > self.performance_limit_ms {
            self.raise(
                &mut created,
                target,
                AlertType::PerformanceIssue,
                Severity::Medium,
                format!("Slow page load: {}", target.display_name()),
                format!(
                    "Load time {}ms exceeds the {}ms limit",
                    snapshot.load_time_ms, self.performance_limit_ms
                ),
            )
            .await?;
        } else {
            self.resolve_if_open(target.id, AlertType::PerformanceIssue)
                .await?;
        }

        Ok(created)
    }

    /// Evaluate a failed scan. No other rules run - there is no snapshot to
    /// evaluate against.
    #[instrument(skip_all, fields(target = %target.display_name()))]
    pub async fn evaluate_failure(
        &self,
        target: &MonitoringTarget,
        error: &ScanError,
    ) -> StorageResult<Vec<Alert>> {
        let mut created = Vec::new();

        let kind = match error.kind {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent; target may need manual review",
        };

        self.raise(
            &mut created,
            target,
            AlertType::ScanFailed,
            Severity::High,
            format!("Scan failed: {}", target.display_name()),
            format!("{} ({kind})", error.message),
        )
        .await?;

        Ok(created)
    }

    /// Create and persist an alert unless one of the same type is still open.
    async fn raise(
        &self,
        created: &mut Vec<Alert>,
        target: &MonitoringTarget,
        alert_type: AlertType,
        severity: Severity,
        title: String,
        description: String,
    ) -> StorageResult<()> {
        if let Some(open) = self.store.find_open_alert(target.id, alert_type).await? {
            trace!(
                "suppressing duplicate {} alert for {} (open since {})",
                alert_type, target.id, open.created_at
            );
            return Ok(());
        }

        let alert = Alert::new(target, alert_type, severity, title, description);
        debug!(
            "raising {} alert ({}) for {}",
            alert_type, severity, target.id
        );

        self.store.insert_alert(alert.clone()).await?;
        created.push(alert);
        Ok(())
    }

    /// Resolve the open alert of this type, if any (condition cleared).
    async fn resolve_if_open(&self, target_id: Uuid, alert_type: AlertType) -> StorageResult<()> {
        if let Some(open) = self.store.find_open_alert(target_id, alert_type).await? {
            debug!("resolving {} alert for {}", alert_type, target_id);
            self.store.resolve_alert(open.alert_id, Utc::now()).await?;
        }
        Ok(())
    }
}
