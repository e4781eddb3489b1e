//! Assembles the running service from configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::AppScanClient;
use crate::config::{AppScanConfig, SlackSettings};
use crate::error::AppScanResult;
use crate::poller::{ScanCompletionPoller, TickSummary};
use crate::report::ReportJobPoller;
use crate::slack::SlackNotifier;

/// All long-lived components, sharing one credential cache.
#[derive(Clone)]
pub struct Service {
    pub client: AppScanClient,
    pub notifier: Arc<SlackNotifier>,
    pub reports: ReportJobPoller,
    pub poller: ScanCompletionPoller,
    poll_interval: Duration,
}

impl Service {
    /// Build the client, Slack notifier and both pollers.
    pub fn build(appscan: &AppScanConfig, slack: SlackSettings) -> AppScanResult<Self> {
        appscan.validate()?;

        let client = AppScanClient::new(appscan)?;
        let monitored_apps = slack.monitored_apps();
        let notifier = Arc::new(SlackNotifier::new(
            slack,
            appscan.base_url(),
            appscan.request_timeout(),
        )?);
        let reports = ReportJobPoller::new(Arc::new(client.clone()));
        let poller =
            ScanCompletionPoller::new(Arc::new(client.clone()), notifier.clone(), monitored_apps);

        Ok(Self {
            client,
            notifier,
            reports,
            poller,
            poll_interval: appscan.poll_interval(),
        })
    }

    /// Interval between scan poller ticks.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run one poll tick and return its counters.
    pub async fn run_once(&self) -> TickSummary {
        self.poller.poll_once().await
    }

    /// Run the scan poller until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        self.poller.run(self.poll_interval, shutdown).await;
    }
}

/// Build the service and poll until `shutdown` completes.
///
/// Poll cycles already running when `shutdown` completes are awaited.
pub async fn run_with_shutdown<F>(
    appscan: AppScanConfig,
    slack: SlackSettings,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let service = Service::build(&appscan, slack).context("failed to build service")?;

    let apps = service.poller.monitored_apps();
    if apps.is_empty() {
        warn!("No applications mapped to Slack channels or users; nothing will be polled");
    } else {
        info!(apps = ?apps, "Monitoring applications");
    }
    info!(
        "Polling {} every {:?}",
        appscan.base_url(),
        service.poll_interval()
    );

    let token = CancellationToken::new();
    let stop = token.clone();
    tokio::join!(service.run(token), async move {
        shutdown.await;
        stop.cancel();
    });
    Ok(())
}
