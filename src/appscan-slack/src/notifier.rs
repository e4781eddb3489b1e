//! Delivery seam for completed scans.

use async_trait::async_trait;

use crate::error::AppScanResult;
use crate::models::ScanRecord;

/// Receives every scan the poller decides to announce.
///
/// Called at most once per scan id per process. An error is logged by the
/// caller and never causes a second delivery attempt.
#[async_trait]
pub trait ScanNotifier: Send + Sync {
    /// Deliver a completion notice for a scan whose latest execution is `Ready`.
    async fn notify_scan_completed(&self, scan: &ScanRecord) -> AppScanResult<()>;
}
