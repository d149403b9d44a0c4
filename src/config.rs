use std::collections::HashMap;
use std::path::PathBuf;

use tracing::trace;

use crate::registry::Cadence;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (snapshots and resolved alerts older
        /// than this are pruned)
        #[serde(default = "default_retention_days")]
        retention_days: u32,

        /// How often the retention job runs, in hours
        #[serde(default = "default_cleanup_interval_hours")]
        cleanup_interval_hours: u32,
    },
    // Future: PostgreSQL, etc.
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./compliance.db")
}

fn default_retention_days() -> u32 {
    90
}

fn default_cleanup_interval_hours() -> u32 {
    24
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Scan provider endpoint
    pub provider: ProviderConfig,

    /// Targets registered at startup
    pub targets: Option<Vec<TargetSpec>>,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    /// Scheduler tuning (optional)
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Notification channels, keyed by channel id
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
}

/// Scan provider endpoint configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the scanning service
    pub endpoint: String,

    /// Optional shared secret sent on every scan request
    pub token: Option<String>,

    /// Per-scan timeout in seconds
    #[serde(default = "default_scan_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_scan_timeout_secs() -> u64 {
    30
}

/// Scheduler tuning knobs
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerConfig {
    /// Tick interval in seconds (shortest supported cadence unit)
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Global bound on concurrently running scans
    #[serde(default = "default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            max_concurrent_scans: default_max_concurrent_scans(),
        }
    }
}

fn default_tick_secs() -> u64 {
    60
}

fn default_max_concurrent_scans() -> usize {
    8
}

/// A target as declared in the config file
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TargetSpec {
    pub url: String,
    pub owner_id: String,
    pub display: Option<String>,
    #[serde(default)]
    pub cadence: Cadence,
    #[serde(default = "default_compliance_threshold")]
    pub compliance_threshold: f64,
    #[serde(default = "default_notify_enabled")]
    pub notify_enabled: bool,
    /// Channel ids from `Config::channels` this target alerts to
    #[serde(default)]
    pub notify_channels: Vec<String>,
}

fn default_compliance_threshold() -> f64 {
    80.0
}

fn default_notify_enabled() -> bool {
    true
}

/// A notification channel declaration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelConfig {
    Webhook(Webhook),
    Discord(Discord),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
