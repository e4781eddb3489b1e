//! Slack Web API delivery.
//!
//! [`SlackNotifier`] is the production [`ScanNotifier`]: it fans a scan
//! completion message out to every channel and user mapped to the scan's
//! application. It also drives the "Generate Report" flow, where a
//! placeholder message is posted first and then replaced with the report
//! link once the report job finishes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::config::SlackSettings;
use crate::error::{AppScanError, AppScanResult};
use crate::messages::{
    MessageContent, REPORT_WAIT_TEXT, report_failed_message, report_ready_message,
    scan_completion_message,
};
use crate::models::ScanRecord;
use crate::notifier::ScanNotifier;
use crate::report::ReportJobPoller;

/// Seconds to back off when Slack rate limits without a `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// Posts scan and report messages through the Slack Web API.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    http: reqwest::Client,
    settings: SlackSettings,
    appscan_base_url: String,
}

impl SlackNotifier {
    /// Create a notifier. `appscan_base_url` is used for console links.
    pub fn new(
        settings: SlackSettings,
        appscan_base_url: impl Into<String>,
        timeout: Duration,
    ) -> AppScanResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppScanError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(http, settings, appscan_base_url))
    }

    /// Create a notifier around an existing HTTP client.
    pub fn with_client(
        http: reqwest::Client,
        settings: SlackSettings,
        appscan_base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            settings,
            appscan_base_url: appscan_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Channel and user mappings in use.
    pub fn settings(&self) -> &SlackSettings {
        &self.settings
    }

    /// Every Slack target (channels first, then users) for an application.
    pub fn targets_for(&self, app: &str) -> Vec<&str> {
        self.settings
            .channels
            .targets_for(app)
            .iter()
            .chain(self.settings.users.targets_for(app))
            .map(String::as_str)
            .collect()
    }

    /// Post a message and return its `ts`.
    pub async fn send_message(&self, channel: &str, content: &MessageContent) -> AppScanResult<String> {
        let mut payload = json!({ "channel": channel, "text": content.text });
        if let Some(blocks) = &content.blocks {
            payload["blocks"] = json!(blocks);
        }

        let response = self.api_call("chat.postMessage", &payload).await?;
        response
            .get("ts")
            .and_then(|ts| ts.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| AppScanError::Slack("Missing ts in chat.postMessage response".to_string()))
    }

    /// Replace an existing message.
    pub async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        content: &MessageContent,
    ) -> AppScanResult<()> {
        let mut payload = json!({ "channel": channel, "ts": ts, "text": content.text });
        // An empty list clears the placeholder's blocks.
        payload["blocks"] = json!(content.blocks.clone().unwrap_or_default());

        self.api_call("chat.update", &payload).await?;
        Ok(())
    }

    /// Generate a PDF report for a scan and post the outcome to `channel`.
    ///
    /// Report failures are reported in the channel and do not make this
    /// call fail; only a failure to post the final message does.
    pub async fn deliver_report(
        &self,
        channel: &str,
        scan_id: &str,
        scan_name: &str,
        reports: &ReportJobPoller,
    ) -> AppScanResult<()> {
        let waiting_ts = match self
            .send_message(channel, &MessageContent::text(REPORT_WAIT_TEXT))
            .await
        {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!(channel = %channel, error = %e, "Failed to post report placeholder");
                None
            }
        };

        let content = match reports.generate_report(scan_id, scan_name).await {
            Ok(link) => {
                info!(scan_id = %scan_id, "Report ready");
                report_ready_message(&link)
            }
            Err(e) => {
                error!(scan_id = %scan_id, error = %e, "Failed to generate report");
                report_failed_message(scan_id, &e.to_string())
            }
        };

        match waiting_ts {
            Some(ts) => self.update_message(channel, &ts, &content).await,
            None => self.send_message(channel, &content).await.map(|_| ()),
        }
    }

    /// Call a Web API method. Non-2xx, 429 and `"ok": false` are errors.
    async fn api_call(&self, method: &str, payload: &Value) -> AppScanResult<Value> {
        let url = format!("{}/{}", self.settings.api_base_url(), method);

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.settings.bot_token())
            .header("Content-Type", "application/json; charset=utf-8")
            .json(payload)
            .send()
            .await
            .map_err(|e| AppScanError::Slack(format!("{} request failed: {}", method, e)))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(AppScanError::Slack(format!(
                "{} rate limited, retry after {}s",
                method, retry_after
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppScanError::Slack(format!("{} failed with {}: {}", method, status, body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppScanError::Slack(format!("{} returned invalid JSON: {}", method, e)))?;

        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let reason = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown");
            return Err(AppScanError::Slack(format!("{} failed: {}", method, reason)));
        }

        debug!(method = %method, "Slack API call succeeded");
        Ok(body)
    }
}

#[async_trait]
impl ScanNotifier for SlackNotifier {
    async fn notify_scan_completed(&self, scan: &ScanRecord) -> AppScanResult<()> {
        if scan.latest_execution.is_none() {
            warn!(scan_id = %scan.id, "Scan has no execution data, skipping notification");
            return Ok(());
        }

        let targets = self.targets_for(&scan.app_name);
        if targets.is_empty() {
            warn!(app = %scan.app_name, "No Slack channels or users mapped for application");
            return Ok(());
        }

        let content = scan_completion_message(scan, &self.appscan_base_url);
        let mut delivered = 0usize;
        let mut last_error = None;
        for target in &targets {
            match self.send_message(target, &content).await {
                Ok(_) => {
                    delivered += 1;
                    info!(scan_id = %scan.id, target = %target, "Sent scan completion notification");
                }
                Err(e) => {
                    error!(scan_id = %scan.id, target = %target, error = %e, "Failed to send scan completion notification");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if delivered == 0 => Err(AppScanError::Slack(format!(
                "all {} targets failed for scan {}: {}",
                targets.len(),
                scan.id,
                e
            ))),
            _ => Ok(()),
        }
    }
}
