//! Scan orchestration for a single target
//!
//! `run_scan` is the only substantially blocking step of the pipeline: it
//! calls the external scanning service, bounded by a hard timeout, and turns
//! the outcome into either an immutable snapshot or a classified failure.
//!
//! `last_scan_at` is written after every attempt regardless of outcome, so a
//! permanently failing target is retried exactly at its cadence instead of
//! in a tight loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::provider::{ScanError, ScanProvider};
use crate::registry::{MonitoringTarget, TargetRegistry};
use crate::snapshot::ScanSnapshot;

/// Runs scans against the provider and materializes snapshots
pub struct ScanOrchestrator {
    provider: Arc<dyn ScanProvider>,
    registry: Arc<TargetRegistry>,
    scan_timeout: Duration,
}

impl ScanOrchestrator {
    pub fn new(
        provider: Arc<dyn ScanProvider>,
        registry: Arc<TargetRegistry>,
        scan_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            registry,
            scan_timeout,
        }
    }

    /// Scan one target and build its snapshot.
    ///
    /// Exactly one snapshot materializes per successful attempt; a failed
    /// attempt materializes none.
    #[instrument(skip(self, target), fields(target = %target.display_name()))]
    pub async fn run_scan(&self, target: &MonitoringTarget) -> Result<ScanSnapshot, ScanError> {
        debug!("scanning {}", target.url);

        // The provider applies the timeout per request; the outer timeout is
        // the hard bound in case the provider misbehaves.
        let result = match timeout(
            self.scan_timeout,
            self.provider.scan(&target.url, self.scan_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ScanError::transient(format!(
                "scan timed out after {:?}",
                self.scan_timeout
            ))),
        };

        let scanned_at = Utc::now();

        // Always advance last_scan_at so cadence-based retry applies to
        // failures too.
        if let Err(e) = self.registry.mark_scanned(target.id, scanned_at).await {
            warn!("failed to record scan attempt for {}: {}", target.id, e);
        }

        match result {
            Ok(scan_result) => {
                debug!(
                    "scan of {} complete: score {:.1}, {} issues",
                    target.url,
                    scan_result.overall_score,
                    scan_result.issues.len()
                );
                Ok(ScanSnapshot::from_result(target.id, scanned_at, scan_result))
            }
            Err(e) => {
                warn!("scan of {} failed: {}", target.url, e);
                Err(e)
            }
        }
    }
}
