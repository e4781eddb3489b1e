//! Scan completion polling.
//!
//! On every tick the poller resolves each monitored application, fetches
//! its latest scan and announces it once it reaches `Ready`. Every scan id
//! is announced at most once per process.
//!
//! Applications are evaluated concurrently and independently. A failure
//! for one is logged and skipped; the next tick retries it naturally. An
//! application still being evaluated by an earlier tick is skipped, so
//! responses for one application are never handled out of order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::FutureExt;
use futures::future::join_all;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::client::AppScanClient;
use crate::error::AppScanResult;
use crate::models::{AppRecord, ScanRecord};
use crate::notifier::ScanNotifier;

/// Backend lookups the poller needs.
#[async_trait]
pub trait ScanSource: Send + Sync {
    /// Resolve an application by name.
    async fn find_application_by_name(&self, name: &str) -> AppScanResult<AppRecord>;

    /// Most recent scan of an application.
    async fn latest_scan_for_application(&self, app_id: &str)
    -> AppScanResult<Option<ScanRecord>>;
}

#[async_trait]
impl ScanSource for AppScanClient {
    async fn find_application_by_name(&self, name: &str) -> AppScanResult<AppRecord> {
        AppScanClient::find_application_by_name(self, name).await
    }

    async fn latest_scan_for_application(
        &self,
        app_id: &str,
    ) -> AppScanResult<Option<ScanRecord>> {
        AppScanClient::latest_scan_for_application(self, app_id).await
    }
}

/// Announced scans per application.
///
/// In-memory only: restarting the process forgets it, so a scan that is
/// still the latest one will be announced again after a restart. Entries
/// are never removed; there is one per completed scan.
#[derive(Debug, Default)]
pub struct DedupState {
    last_notified: DashMap<String, String>,
    announced: DashSet<(String, String)>,
}

impl DedupState {
    /// Create empty state sized for the monitored applications.
    pub fn with_capacity(apps: usize) -> Self {
        Self {
            last_notified: DashMap::with_capacity(apps),
            announced: DashSet::with_capacity(apps),
        }
    }

    /// Most recently announced scan for an application.
    pub fn last_notified(&self, app: &str) -> Option<String> {
        self.last_notified.get(app).map(|id| id.value().clone())
    }

    /// Whether `scan_id` was ever announced for `app`.
    pub fn was_announced(&self, app: &str, scan_id: &str) -> bool {
        self.announced
            .contains(&(app.to_string(), scan_id.to_string()))
    }

    /// Record `scan_id` for `app` unless it was announced before.
    ///
    /// Returns `true` if the caller won the right to announce this scan.
    pub fn try_mark(&self, app: &str, scan_id: &str) -> bool {
        if !self
            .announced
            .insert((app.to_string(), scan_id.to_string()))
        {
            return false;
        }
        self.last_notified
            .insert(app.to_string(), scan_id.to_string());
        true
    }

    /// Number of applications with an announced scan.
    pub fn len(&self) -> usize {
        self.last_notified.len()
    }

    /// Whether nothing has been announced yet.
    pub fn is_empty(&self) -> bool {
        self.last_notified.is_empty()
    }
}

/// Marks an application as being evaluated until dropped.
struct InFlight<'a> {
    apps: &'a DashSet<String>,
    app: String,
}

impl<'a> InFlight<'a> {
    fn claim(apps: &'a DashSet<String>, app: &str) -> Option<Self> {
        apps.insert(app.to_string()).then(|| Self {
            apps,
            app: app.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.apps.remove(&self.app);
    }
}

/// What one application's evaluation concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppOutcome {
    /// The application has no scans, or its latest scan has no id.
    NoScans,
    /// The latest scan was already announced.
    AlreadyNotified {
        /// Id of the announced scan.
        scan_id: String,
    },
    /// The latest scan has not finished.
    NotReady {
        /// Id of the unfinished scan.
        scan_id: String,
        /// Execution status, if the scan has executed.
        status: Option<String>,
    },
    /// The latest scan was handed to the notifier.
    Notified {
        /// Id of the announced scan.
        scan_id: String,
    },
    /// An earlier tick is still evaluating this application.
    InProgress,
    /// Lookup failed; retried on the next tick.
    Failed {
        /// Display form of the error.
        reason: String,
    },
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Applications looked at, whatever the outcome.
    pub evaluated: usize,
    /// Scans handed to the notifier.
    pub notified: usize,
    /// Latest scans that have not finished.
    pub not_ready: usize,
    /// Applications without a usable scan.
    pub no_scans: usize,
    /// Latest scans announced by an earlier tick.
    pub already_notified: usize,
    /// Applications skipped because an earlier tick still owns them.
    pub in_progress: usize,
    /// Applications whose lookup failed.
    pub failed: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: &AppOutcome) {
        self.evaluated += 1;
        match outcome {
            AppOutcome::NoScans => self.no_scans += 1,
            AppOutcome::AlreadyNotified { .. } => self.already_notified += 1,
            AppOutcome::NotReady { .. } => self.not_ready += 1,
            AppOutcome::Notified { .. } => self.notified += 1,
            AppOutcome::InProgress => self.in_progress += 1,
            AppOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Announces completed scans of monitored applications.
#[derive(Clone)]
pub struct ScanCompletionPoller {
    source: Arc<dyn ScanSource>,
    notifier: Arc<dyn ScanNotifier>,
    monitored_apps: Arc<Vec<String>>,
    dedup: Arc<DedupState>,
    in_flight: Arc<DashSet<String>>,
}

impl ScanCompletionPoller {
    /// Create a poller with fresh dedup state.
    pub fn new(
        source: Arc<dyn ScanSource>,
        notifier: Arc<dyn ScanNotifier>,
        monitored_apps: Vec<String>,
    ) -> Self {
        let dedup = Arc::new(DedupState::with_capacity(monitored_apps.len()));
        Self::with_dedup_state(source, notifier, monitored_apps, dedup)
    }

    /// Create a poller around existing dedup state.
    pub fn with_dedup_state(
        source: Arc<dyn ScanSource>,
        notifier: Arc<dyn ScanNotifier>,
        monitored_apps: Vec<String>,
        dedup: Arc<DedupState>,
    ) -> Self {
        Self {
            source,
            notifier,
            in_flight: Arc::new(DashSet::with_capacity(monitored_apps.len())),
            monitored_apps: Arc::new(monitored_apps),
            dedup,
        }
    }

    /// Dedup state shared by all ticks.
    pub fn dedup_state(&self) -> &Arc<DedupState> {
        &self.dedup
    }

    /// Applications evaluated on every tick.
    pub fn monitored_apps(&self) -> &[String] {
        &self.monitored_apps
    }

    /// Evaluate every monitored application once, concurrently.
    pub async fn poll_once(&self) -> TickSummary {
        if self.monitored_apps.is_empty() {
            warn!("No applications configured for monitoring, skipping poll cycle");
            return TickSummary::default();
        }

        info!(
            apps = self.monitored_apps.len(),
            "Polling for completed scans"
        );

        let outcomes = join_all(
            self.monitored_apps
                .iter()
                .map(|app| self.evaluate_app(app)),
        )
        .await;

        let mut summary = TickSummary::default();
        for outcome in &outcomes {
            summary.record(outcome);
        }
        debug!(?summary, "Poll cycle finished");
        summary
    }

    /// Evaluate one application. Never fails; failures become [`AppOutcome::Failed`].
    pub async fn evaluate_app(&self, app: &str) -> AppOutcome {
        let Some(_claim) = InFlight::claim(&self.in_flight, app) else {
            debug!(app = %app, "Application still being evaluated by an earlier tick");
            return AppOutcome::InProgress;
        };

        match self.check_app(app).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(app = %app, error = %e, retryable = e.is_retryable(), "Failed to poll application");
                AppOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn check_app(&self, app: &str) -> AppScanResult<AppOutcome> {
        let record = self.source.find_application_by_name(app).await?;
        let Some(scan) = self.source.latest_scan_for_application(&record.id).await? else {
            debug!(app = %app, "No scans found for application");
            return Ok(AppOutcome::NoScans);
        };

        if scan.id.trim().is_empty() {
            warn!(app = %app, "Latest scan has no id, skipping");
            return Ok(AppOutcome::NoScans);
        }

        if self.dedup.was_announced(app, &scan.id) {
            return Ok(AppOutcome::AlreadyNotified { scan_id: scan.id });
        }

        info!(app = %app, scan_id = %scan.id, status = scan.status().unwrap_or("Unknown"), "Found latest scan");

        if !scan.is_ready() {
            debug!(app = %app, scan_id = %scan.id, "Scan not ready yet, will check again next cycle");
            return Ok(AppOutcome::NotReady {
                status: scan.status().map(str::to_string),
                scan_id: scan.id,
            });
        }

        // Recorded before delivery and never rolled back.
        if !self.dedup.try_mark(app, &scan.id) {
            return Ok(AppOutcome::AlreadyNotified { scan_id: scan.id });
        }

        info!(app = %app, scan_id = %scan.id, "Scan is complete, sending notification");
        if let Err(e) = self.notifier.notify_scan_completed(&scan).await {
            error!(app = %app, scan_id = %scan.id, error = %e, "Scan notification failed, not retrying");
        }

        Ok(AppOutcome::Notified { scan_id: scan.id })
    }

    /// Tick at a fixed rate until `shutdown` fires.
    ///
    /// Each tick runs on its own task so a slow backend never holds up the
    /// schedule. On shutdown no new tick starts and ticks already running
    /// are awaited.
    pub async fn run(self, every: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let ticks = TaskTracker::new();
        info!(interval_ms = every.as_millis() as u64, "Scan completion poller started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let poller = self.clone();
                    ticks.spawn(async move {
                        if AssertUnwindSafe(poller.poll_once()).catch_unwind().await.is_err() {
                            error!("Poll cycle panicked");
                        }
                    });
                }
            }
        }

        ticks.close();
        if !ticks.is_empty() {
            info!(running = ticks.len(), "Waiting for in-flight poll cycles");
        }
        ticks.wait().await;
        info!("Scan completion poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppScanError;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scan(id: &str, app: &str, status: Option<&str>) -> ScanRecord {
        ScanRecord {
            id: id.to_string(),
            app_name: app.to_string(),
            name: format!("{} scan", app),
            latest_execution: status.map(|s| crate::models::LatestExecution {
                status: Some(s.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// In-memory backend whose latest scan per app can be changed between ticks.
    #[derive(Default)]
    struct FakeSource {
        latest: Mutex<HashMap<String, Option<ScanRecord>>>,
        broken: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn set_latest(&self, app: &str, scan: Option<ScanRecord>) {
            self.latest.lock().insert(app.to_string(), scan);
        }

        fn break_app(&self, app: &str) {
            self.broken.lock().push(app.to_string());
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScanSource for FakeSource {
        async fn find_application_by_name(&self, name: &str) -> AppScanResult<AppRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.broken.lock().iter().any(|b| b == name) {
                return Err(AppScanError::Backend("lookup failed with status 500".to_string()));
            }
            if !self.latest.lock().contains_key(name) {
                return Err(AppScanError::NotFound(format!("Application not found: {}", name)));
            }
            Ok(AppRecord {
                id: format!("id-{}", name),
                name: name.to_string(),
                ..Default::default()
            })
        }

        async fn latest_scan_for_application(
            &self,
            app_id: &str,
        ) -> AppScanResult<Option<ScanRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let app = app_id.trim_start_matches("id-");
            Ok(self.latest.lock().get(app).cloned().flatten())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        delivered: Mutex<Vec<String>>,
        fail: bool,
        delay: Duration,
    }

    impl RecordingNotifier {
        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().clone()
        }
    }

    #[async_trait]
    impl ScanNotifier for RecordingNotifier {
        async fn notify_scan_completed(&self, scan: &ScanRecord) -> AppScanResult<()> {
            assert!(scan.latest_execution.is_some());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.delivered.lock().push(scan.id.clone());
            if self.fail {
                return Err(AppScanError::Slack("channel_not_found".to_string()));
            }
            Ok(())
        }
    }

    fn poller_for(
        source: &Arc<FakeSource>,
        notifier: &Arc<RecordingNotifier>,
        apps: &[&str],
    ) -> ScanCompletionPoller {
        ScanCompletionPoller::new(
            source.clone(),
            notifier.clone(),
            apps.iter().map(|a| a.to_string()).collect(),
        )
    }

    #[test]
    fn test_dedup_try_mark() {
        let dedup = DedupState::default();
        assert!(dedup.is_empty());
        assert!(dedup.try_mark("PayGateway", "S1"));
        assert!(!dedup.try_mark("PayGateway", "S1"));
        assert!(dedup.try_mark("PayGateway", "S2"));
        assert!(!dedup.try_mark("PayGateway", "S1"));
        assert!(dedup.was_announced("PayGateway", "S1"));
        assert!(!dedup.was_announced("Billing", "S1"));
        assert_eq!(dedup.last_notified("PayGateway").as_deref(), Some("S2"));
        assert_eq!(dedup.len(), 1);
    }

    #[tokio::test]
    async fn test_pay_gateway_walkthrough() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller_for(&source, &notifier, &["PayGateway"]);

        source.set_latest("PayGateway", Some(scan("S1", "PayGateway", Some("Running"))));
        let summary = poller.poll_once().await;
        assert_eq!(summary.not_ready, 1);
        assert!(notifier.delivered().is_empty());
        assert_eq!(poller.dedup_state().last_notified("PayGateway"), None);

        source.set_latest("PayGateway", Some(scan("S1", "PayGateway", Some("Ready"))));
        let summary = poller.poll_once().await;
        assert_eq!(summary.notified, 1);
        assert_eq!(notifier.delivered(), vec!["S1".to_string()]);
        assert_eq!(
            poller.dedup_state().last_notified("PayGateway").as_deref(),
            Some("S1")
        );

        let summary = poller.poll_once().await;
        assert_eq!(summary.already_notified, 1);
        assert_eq!(notifier.delivered(), vec!["S1".to_string()]);

        source.set_latest("PayGateway", Some(scan("S2", "PayGateway", Some("Ready"))));
        poller.poll_once().await;
        assert_eq!(notifier.delivered(), vec!["S1".to_string(), "S2".to_string()]);
        assert_eq!(
            poller.dedup_state().last_notified("PayGateway").as_deref(),
            Some("S2")
        );
    }

    #[tokio::test]
    async fn test_never_ready_never_notifies() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller_for(&source, &notifier, &["Billing"]);

        for status in [None, Some("Running"), Some("Failed"), Some("Paused"), Some("Running")] {
            source.set_latest("Billing", Some(scan("S7", "Billing", status)));
            let outcome = poller.evaluate_app("Billing").await;
            assert!(matches!(outcome, AppOutcome::NotReady { .. }));
        }
        assert!(notifier.delivered().is_empty());
        assert!(poller.dedup_state().is_empty());
    }

    #[tokio::test]
    async fn test_ready_status_is_case_insensitive() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller_for(&source, &notifier, &["Billing"]);

        source.set_latest("Billing", Some(scan("S1", "Billing", Some("READY"))));
        assert_eq!(
            poller.evaluate_app("Billing").await,
            AppOutcome::Notified {
                scan_id: "S1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_monitored_set_makes_no_calls() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller_for(&source, &notifier, &[]);

        let summary = poller.poll_once().await;
        assert_eq!(summary, TickSummary::default());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_scans_is_not_an_error() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller_for(&source, &notifier, &["Fresh"]);

        source.set_latest("Fresh", None);
        assert_eq!(poller.evaluate_app("Fresh").await, AppOutcome::NoScans);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_per_app() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller_for(&source, &notifier, &["Broken", "Missing", "PayGateway"]);

        source.set_latest("Broken", Some(scan("B1", "Broken", Some("Ready"))));
        source.break_app("Broken");
        source.set_latest("PayGateway", Some(scan("S1", "PayGateway", Some("Ready"))));

        let summary = poller.poll_once().await;
        assert_eq!(summary.evaluated, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.notified, 1);
        assert_eq!(notifier.delivered(), vec!["S1".to_string()]);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_not_retried() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let poller = poller_for(&source, &notifier, &["PayGateway"]);

        source.set_latest("PayGateway", Some(scan("S1", "PayGateway", Some("Ready"))));
        for _ in 0..3 {
            poller.poll_once().await;
        }
        assert_eq!(notifier.delivered(), vec!["S1".to_string()]);
        assert_eq!(
            poller.dedup_state().last_notified("PayGateway").as_deref(),
            Some("S1")
        );
    }

    #[tokio::test]
    async fn test_overlapping_ticks_notify_once() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller_for(&source, &notifier, &["PayGateway"]);
        source.set_latest("PayGateway", Some(scan("S1", "PayGateway", Some("Ready"))));

        let ticks: Vec<_> = (0..8)
            .map(|_| {
                let poller = poller.clone();
                tokio::spawn(async move { poller.poll_once().await })
            })
            .collect();
        for tick in ticks {
            tick.await.unwrap();
        }

        assert_eq!(notifier.delivered(), vec!["S1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller_for(&source, &notifier, &["PayGateway"]);
        source.set_latest("PayGateway", None);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(poller.run(Duration::from_secs(60), shutdown.clone()));

        // Ticks at 0s, 60s and 120s.
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.cancel();
        handle.await.unwrap();
        tokio::task::yield_now().await;

        // Two backend calls (lookup + latest scan) per tick.
        assert_eq!(source.calls(), 6);
    }

    /// Serves latest-scan responses in order, each after its own delay.
    struct ScriptedSource {
        responses: Mutex<std::collections::VecDeque<(ScanRecord, Duration)>>,
    }

    #[async_trait]
    impl ScanSource for ScriptedSource {
        async fn find_application_by_name(&self, name: &str) -> AppScanResult<AppRecord> {
            Ok(AppRecord {
                id: format!("id-{}", name),
                name: name.to_string(),
                ..Default::default()
            })
        }

        async fn latest_scan_for_application(
            &self,
            _app_id: &str,
        ) -> AppScanResult<Option<ScanRecord>> {
            let next = self.responses.lock().pop_front();
            let Some((scan, delay)) = next else {
                return Ok(None);
            };
            tokio::time::sleep(delay).await;
            Ok(Some(scan))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_does_not_reannounce_older_scan() {
        let fast = Duration::ZERO;
        let source = Arc::new(ScriptedSource {
            responses: Mutex::new(
                vec![
                    (scan("S1", "PayGateway", Some("Ready")), fast),
                    (scan("S1", "PayGateway", Some("Ready")), Duration::from_secs(1)),
                    (scan("S2", "PayGateway", Some("Ready")), fast),
                    (scan("S2", "PayGateway", Some("Ready")), fast),
                ]
                .into(),
            ),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = ScanCompletionPoller::new(
            source,
            notifier.clone(),
            vec!["PayGateway".to_string()],
        );

        poller.poll_once().await;

        let slow = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.poll_once().await })
        };
        // Let the slow tick reach its delayed response.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let overlapping = poller.poll_once().await;
        assert_eq!(overlapping.in_progress, 1);

        let slow = slow.await.unwrap();
        assert_eq!(slow.already_notified, 1);

        poller.poll_once().await;
        poller.poll_once().await;

        assert_eq!(notifier.delivered(), vec!["S1".to_string(), "S2".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_latest_scan_is_not_reannounced() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller_for(&source, &notifier, &["PayGateway"]);

        source.set_latest("PayGateway", Some(scan("S1", "PayGateway", Some("Ready"))));
        poller.poll_once().await;
        source.set_latest("PayGateway", Some(scan("S2", "PayGateway", Some("Ready"))));
        poller.poll_once().await;

        // A lagging replica reports the older scan again.
        source.set_latest("PayGateway", Some(scan("S1", "PayGateway", Some("Ready"))));
        assert_eq!(
            poller.evaluate_app("PayGateway").await,
            AppOutcome::AlreadyNotified {
                scan_id: "S1".to_string()
            }
        );
        assert_eq!(notifier.delivered(), vec!["S1".to_string(), "S2".to_string()]);
        assert_eq!(poller.dedup_state().last_notified("PayGateway").as_deref(), Some("S2"));
    }

    #[tokio::test]
    async fn test_scan_without_id_is_skipped() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let poller = poller_for(&source, &notifier, &["PayGateway"]);

        source.set_latest("PayGateway", Some(scan("", "PayGateway", Some("Ready"))));
        assert_eq!(poller.evaluate_app("PayGateway").await, AppOutcome::NoScans);
        assert!(notifier.delivered().is_empty());
        assert!(poller.dedup_state().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_running_tick() {
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(RecordingNotifier {
            delay: Duration::from_secs(10),
            ..Default::default()
        });
        let poller = poller_for(&source, &notifier, &["PayGateway"]);
        source.set_latest("PayGateway", Some(scan("S1", "PayGateway", Some("Ready"))));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(poller.run(Duration::from_secs(60), shutdown.clone()));

        // First tick is mid-delivery when shutdown fires.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(notifier.delivered().is_empty());
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(notifier.delivered(), vec!["S1".to_string()]);
    }
}
