pub mod alerts;
pub mod config;
pub mod detector;
pub mod engine;
pub mod notify;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod snapshot;
pub mod storage;

pub mod actors;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Result of one compliance scan, as returned by the Scan Provider.
///
/// The engine treats this payload as opaque domain data: it copies scores,
/// fingerprints the issue set, and stores the whole thing alongside the
/// snapshot. The scan logic itself (HTML parsing, legal-text heuristics)
/// lives on the provider side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResult {
    /// Overall compliance score (0-100)
    pub overall_score: f64,

    /// Per-category scores (e.g. "cookies", "privacy_policy", "accessibility")
    #[serde(default)]
    pub category_scores: BTreeMap<String, f64>,

    /// Individual findings
    #[serde(default)]
    pub issues: Vec<ScanIssue>,

    /// TLS state of the scanned site
    #[serde(default)]
    pub tls: TlsInfo,

    /// Page load time in milliseconds
    #[serde(default)]
    pub load_time_ms: u64,
}

/// A single compliance finding reported by the provider.
///
/// `stable_id` is a provider-assigned identifier that stays constant for the
/// same finding across scans; it is what makes the issue-set fingerprint
/// meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanIssue {
    pub category: String,
    pub severity: String,
    pub stable_id: String,
}

/// TLS state of the scanned site
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TlsInfo {
    /// Whether the site is served over TLS at all
    #[serde(default)]
    pub enabled: bool,

    /// Whether the presented certificate validates
    #[serde(default)]
    pub valid: bool,
}

impl TlsInfo {
    /// A site counts as secure only when TLS is on and the certificate is valid.
    pub fn is_secure(&self) -> bool {
        self.enabled && self.valid
    }
}
