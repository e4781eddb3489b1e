//! Report generation with bounded status polling.
//!
//! AppScan renders reports asynchronously and offers no completion
//! callback, so [`ReportJobPoller::generate_report`] submits the job and
//! then checks its status a fixed number of times with a fixed pause in
//! between. With the default policy the worst case is 12 checks spread
//! over roughly one minute.
//!
//! A report job occupies its task for the whole wait. Run it through
//! [`ReportJobPoller::spawn_report_job`] (or your own `tokio::spawn`),
//! never inline on the scan poller's tick path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::AppScanClient;
use crate::error::{AppScanError, AppScanResult};
use crate::models::{ReportConfiguration, ReportStatus};

/// Status checks performed before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 12;

/// Pause between two status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Backend operations needed to produce a report.
#[async_trait]
pub trait ReportBackend: Send + Sync {
    /// Submit a report job for a scan and return the report id.
    async fn create_report(
        &self,
        scan_id: &str,
        configuration: &ReportConfiguration,
    ) -> AppScanResult<String>;

    /// Fetch the job's current status, if the backend knows the id yet.
    async fn report_status(&self, report_id: &str) -> AppScanResult<Option<ReportStatus>>;
}

#[async_trait]
impl ReportBackend for AppScanClient {
    async fn create_report(
        &self,
        scan_id: &str,
        configuration: &ReportConfiguration,
    ) -> AppScanResult<String> {
        AppScanClient::create_report(self, scan_id, configuration).await
    }

    async fn report_status(&self, report_id: &str) -> AppScanResult<Option<ReportStatus>> {
        AppScanClient::report_status(self, report_id).await
    }
}

/// Attempt budget and pacing for status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportPollPolicy {
    /// Number of status checks.
    pub max_attempts: u32,
    /// Pause between checks.
    pub interval: Duration,
}

impl Default for ReportPollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ReportPollPolicy {
    /// Longest time spent sleeping between checks.
    pub fn worst_case_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Submits report jobs and waits for their download links.
#[derive(Clone)]
pub struct ReportJobPoller {
    backend: Arc<dyn ReportBackend>,
    policy: ReportPollPolicy,
}

impl std::fmt::Debug for ReportJobPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportJobPoller")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ReportJobPoller {
    /// Create a poller with the default policy.
    pub fn new(backend: Arc<dyn ReportBackend>) -> Self {
        Self::with_policy(backend, ReportPollPolicy::default())
    }

    /// Create a poller with a custom policy.
    pub fn with_policy(backend: Arc<dyn ReportBackend>, policy: ReportPollPolicy) -> Self {
        Self { backend, policy }
    }

    /// Polling policy in use.
    pub fn policy(&self) -> ReportPollPolicy {
        self.policy
    }

    /// Generate a PDF report for a scan and return its download link.
    pub async fn generate_report(&self, scan_id: &str, scan_name: &str) -> AppScanResult<String> {
        self.generate_report_with_cancel(scan_id, scan_name, &CancellationToken::new())
            .await
    }

    /// Like [`generate_report`](Self::generate_report), but gives up with
    /// [`AppScanError::Cancelled`] as soon as `cancel` fires.
    pub async fn generate_report_with_cancel(
        &self,
        scan_id: &str,
        scan_name: &str,
        cancel: &CancellationToken,
    ) -> AppScanResult<String> {
        let configuration = ReportConfiguration::pdf(scan_name, Utc::now());
        let report_id = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled(scan_id)),
            created = self.backend.create_report(scan_id, &configuration) => created?,
        };
        info!(scan_id = %scan_id, report_id = %report_id, "Report job submitted");

        for attempt in 1..=self.policy.max_attempts {
            let status = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled(scan_id)),
                status = self.backend.report_status(&report_id) => status?,
            };

            match status {
                Some(report) if report.is_ready() => {
                    return match report.download_link.filter(|link| !link.is_empty()) {
                        Some(link) => {
                            info!(scan_id = %scan_id, report_id = %report_id, attempt, "Report ready");
                            Ok(link)
                        }
                        None => {
                            warn!(report_id = %report_id, "Report is ready but has no download link");
                            Err(AppScanError::ReportTimeout {
                                scan_id: scan_id.to_string(),
                                attempts: attempt,
                            })
                        }
                    };
                }
                Some(report) => {
                    debug!(report_id = %report_id, attempt, status = %report.status, "Report not ready");
                }
                None => {
                    debug!(report_id = %report_id, attempt, "Report not listed yet");
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled(scan_id)),
                    _ = tokio::time::sleep(self.policy.interval) => {}
                }
            }
        }

        warn!(
            scan_id = %scan_id,
            report_id = %report_id,
            attempts = self.policy.max_attempts,
            "Report not ready within attempt budget"
        );
        Err(AppScanError::ReportTimeout {
            scan_id: scan_id.to_string(),
            attempts: self.policy.max_attempts,
        })
    }

    /// Run a report job on its own task.
    pub fn spawn_report_job(
        &self,
        scan_id: impl Into<String>,
        scan_name: impl Into<String>,
        cancel: CancellationToken,
    ) -> JoinHandle<AppScanResult<String>> {
        let poller = self.clone();
        let scan_id = scan_id.into();
        let scan_name = scan_name.into();
        tokio::spawn(async move {
            poller
                .generate_report_with_cancel(&scan_id, &scan_name, &cancel)
                .await
        })
    }
}

fn cancelled(scan_id: &str) -> AppScanError {
    AppScanError::Cancelled(format!("report generation for scan {}", scan_id))
}
