//! Target registry - owns the set of monitored targets
//!
//! The registry is the single owner of `MonitoringTarget` records. It is
//! shared (behind `Arc`) between the scheduler, the pipeline tasks, and the
//! management surface; every mutation goes through its methods so the locking
//! discipline lives in one place.
//!
//! Disabling a target takes effect on the scheduler's next tick: the
//! scheduler re-reads `list_active()` every tick and never caches targets
//! across ticks.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use uuid::Uuid;

/// Result type alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during registry operations
#[derive(Debug)]
pub enum RegistryError {
    /// No target with the given id exists
    NotFound(Uuid),

    /// Invalid target parameters (bad threshold, empty URL, ...)
    Validation(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound(id) => write!(f, "unknown target: {}", id),
            RegistryError::Validation(msg) => write!(f, "invalid target configuration: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}

/// How often a target is re-scanned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl Cadence {
    pub fn as_duration(&self) -> Duration {
        match self {
            Cadence::Hourly => Duration::from_secs(60 * 60),
            Cadence::Daily => Duration::from_secs(24 * 60 * 60),
            Cadence::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Hourly => write!(f, "hourly"),
            Cadence::Daily => write!(f, "daily"),
            Cadence::Weekly => write!(f, "weekly"),
        }
    }
}

/// A website under continuous compliance watch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringTarget {
    pub id: Uuid,
    pub url: String,
    pub owner_id: String,
    pub display: Option<String>,
    pub cadence: Cadence,
    pub enabled: bool,
    /// Alert when the overall score falls below this (0-100)
    pub compliance_threshold: f64,
    pub notify_enabled: bool,
    pub notify_channels: Vec<String>,
    pub last_scan_at: Option<DateTime<Utc>>,
}

impl MonitoringTarget {
    /// Display name for logs and notifications
    pub fn display_name(&self) -> String {
        self.display.clone().unwrap_or_else(|| self.url.clone())
    }

    /// Whether this target's cadence has elapsed since its last scan.
    ///
    /// A never-scanned target is always due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }

        match self.last_scan_at {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed
                    >= chrono::Duration::from_std(self.cadence.as_duration())
                        .unwrap_or_else(|_| chrono::Duration::zero())
            }
        }
    }
}

/// Parameters for registering a new target
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub url: String,
    pub owner_id: String,
    pub display: Option<String>,
    pub cadence: Cadence,
    pub compliance_threshold: f64,
    pub notify_enabled: bool,
    pub notify_channels: Vec<String>,
}

/// Partial update applied to an existing target. `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct TargetUpdate {
    pub display: Option<String>,
    pub cadence: Option<Cadence>,
    pub compliance_threshold: Option<f64>,
    pub enabled: Option<bool>,
    pub notify_enabled: Option<bool>,
    pub notify_channels: Option<Vec<String>>,
}

/// Shared registry of monitoring targets
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: RwLock<HashMap<Uuid, MonitoringTarget>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new target. Validates the configuration, assigns an id,
    /// and enables the target.
    pub async fn register(&self, config: TargetConfig) -> RegistryResult<Uuid> {
        validate_url(&config.url)?;
        validate_threshold(config.compliance_threshold)?;

        let id = Uuid::new_v4();
        let target = MonitoringTarget {
            id,
            url: config.url,
            owner_id: config.owner_id,
            display: config.display,
            cadence: config.cadence,
            enabled: true,
            compliance_threshold: config.compliance_threshold,
            notify_enabled: config.notify_enabled,
            notify_channels: config.notify_channels,
            last_scan_at: None,
        };

        debug!("registered target {} ({})", id, target.display_name());
        self.targets.write().await.insert(id, target);
        Ok(id)
    }

    /// Apply a partial update to a target.
    pub async fn update(&self, target_id: Uuid, update: TargetUpdate) -> RegistryResult<bool> {
        if let Some(threshold) = update.compliance_threshold {
            validate_threshold(threshold)?;
        }

        let mut targets = self.targets.write().await;
        let target = targets
            .get_mut(&target_id)
            .ok_or(RegistryError::NotFound(target_id))?;

        if let Some(display) = update.display {
            target.display = Some(display);
        }
        if let Some(cadence) = update.cadence {
            target.cadence = cadence;
        }
        if let Some(threshold) = update.compliance_threshold {
            target.compliance_threshold = threshold;
        }
        if let Some(enabled) = update.enabled {
            target.enabled = enabled;
        }
        if let Some(notify_enabled) = update.notify_enabled {
            target.notify_enabled = notify_enabled;
        }
        if let Some(channels) = update.notify_channels {
            target.notify_channels = channels;
        }

        trace!("updated target {}", target_id);
        Ok(true)
    }

    /// Stop scheduling a target without deleting its history (soft delete).
    pub async fn disable(&self, target_id: Uuid) -> RegistryResult<bool> {
        let mut targets = self.targets.write().await;
        let target = targets
            .get_mut(&target_id)
            .ok_or(RegistryError::NotFound(target_id))?;

        target.enabled = false;
        debug!("disabled target {}", target_id);
        Ok(true)
    }

    pub async fn get(&self, target_id: Uuid) -> RegistryResult<MonitoringTarget> {
        self.targets
            .read()
            .await
            .get(&target_id)
            .cloned()
            .ok_or(RegistryError::NotFound(target_id))
    }

    /// All enabled targets
    pub async fn list_active(&self) -> Vec<MonitoringTarget> {
        self.targets
            .read()
            .await
            .values()
            .filter(|t| t.enabled)
            .cloned()
            .collect()
    }

    /// All targets, enabled or not
    pub async fn list_all(&self) -> Vec<MonitoringTarget> {
        self.targets.read().await.values().cloned().collect()
    }

    /// Targets owned by `owner_id`
    pub async fn list_by_owner(&self, owner_id: &str) -> Vec<MonitoringTarget> {
        self.targets
            .read()
            .await
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect()
    }

    /// Record a scan attempt. Written after every attempt, success or not,
    /// so a permanently failing target is still retried only at cadence.
    pub async fn mark_scanned(&self, target_id: Uuid, at: DateTime<Utc>) -> RegistryResult<()> {
        let mut targets = self.targets.write().await;
        let target = targets
            .get_mut(&target_id)
            .ok_or(RegistryError::NotFound(target_id))?;

        target.last_scan_at = Some(at);
        Ok(())
    }
}

fn validate_url(url: &str) -> RegistryResult<()> {
    if url.trim().is_empty() {
        return Err(RegistryError::Validation("url must not be empty".into()));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(RegistryError::Validation(format!(
            "url must be http(s): {url}"
        )));
    }
    Ok(())
}

fn validate_threshold(threshold: f64) -> RegistryResult<()> {
    if !(0.0..=100.0).contains(&threshold) || !threshold.is_finite() {
        return Err(RegistryError::Validation(format!(
            "compliance_threshold must be within [0, 100], got {threshold}"
        )));
    }
    Ok(())
}
