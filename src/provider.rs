//! Scan Provider client
//!
//! The compliance scan itself (crawling, HTML parsing, legal-text
//! heuristics) happens in an external scanning service. This module owns the
//! narrow interface to it: a `ScanProvider` trait the rest of the engine
//! consumes, and an HTTP implementation against the real service.
//!
//! Failures are classified at this boundary:
//!
//! - `Transient` - timeouts, connection errors, 5xx: worth retrying at the
//!   next cadence tick
//! - `Permanent` - malformed URLs, 4xx, unparseable payloads: the target is
//!   misconfigured and will keep failing until someone fixes it

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::ScanResult;

/// Whether a failed scan is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network error, timeout, 5xx - retry at the next cadence tick
    Transient,

    /// Target misconfiguration, 4xx - retries will keep failing until fixed
    Permanent,
}

/// A failed scan attempt
#[derive(Debug, Clone)]
pub struct ScanError {
    pub kind: FailureKind,
    pub message: String,
}

impl ScanError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }

    /// Classify an HTTP status code from the scanning service.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        if status.is_server_error() {
            Self::transient(format!("scan service returned {}", status))
        } else {
            Self::permanent(format!("scan service rejected request: {}", status))
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Transient => write!(f, "transient scan failure: {}", self.message),
            FailureKind::Permanent => write!(f, "permanent scan failure: {}", self.message),
        }
    }
}

impl std::error::Error for ScanError {}

impl From<reqwest::Error> for ScanError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::transient(err.to_string())
        } else if err.is_builder() || err.is_decode() {
            Self::permanent(err.to_string())
        } else {
            Self::transient(err.to_string())
        }
    }
}

/// Interface to the external scanning service.
///
/// Implementations must be cheap to share (`Send + Sync`); the scheduler
/// hands one `Arc<dyn ScanProvider>` to every pipeline task.
#[async_trait]
pub trait ScanProvider: Send + Sync {
    /// Scan `url` and return the compliance result.
    ///
    /// The call is expected to be slow (the service loads and analyzes the
    /// page); `timeout` bounds the whole request.
    async fn scan(&self, url: &str, timeout: Duration) -> Result<ScanResult, ScanError>;
}

/// HTTP client for the scanning service
///
/// The client is built once and reused across requests.
pub struct HttpScanProvider {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpScanProvider {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .build()
                .expect("Failed to build HTTP client"),
            endpoint: endpoint.into(),
            token,
        }
    }

    fn scan_url(&self) -> String {
        format!("{}/scan", self.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl ScanProvider for HttpScanProvider {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn scan(&self, url: &str, timeout: Duration) -> Result<ScanResult, ScanError> {
        trace!("requesting scan of {url}");

        let mut request = self
            .client
            .get(self.scan_url())
            .query(&[("url", url)])
            .timeout(timeout);

        if let Some(token) = &self.token {
            request = request.header("X-SCAN-SECRET", token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(ScanError::from_status(response.status()));
        }

        let body = response.text().await?;

        let result: ScanResult = serde_json::from_str(&body)
            .map_err(|e| ScanError::permanent(format!("unparseable scan result: {e}")))?;

        trace!("scan of {url} complete (score {})", result.overall_score);
        Ok(result)
    }
}
