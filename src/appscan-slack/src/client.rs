//! AppScan REST client.
//!
//! Every call fetches a valid credential from the shared
//! [`CredentialCache`] and issues exactly one authenticated request. Errors
//! are returned to the caller untouched; nothing is retried here.

use std::sync::Arc;
use std::time::Instant;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::CredentialCache;
use crate::config::AppScanConfig;
use crate::error::{AppScanError, AppScanResult};
use crate::models::{
    AppRecord, CreatedReport, ItemsResponse, ReportConfiguration, ReportStatus, ScanListing,
    ScanRecord,
};

/// Number of scans returned by [`AppScanClient::scans_by_user`] by default.
pub const DEFAULT_USER_SCAN_LIMIT: usize = 10;

/// Cap for [`AppScanClient::list_applications`], sized for one Slack message.
pub const APPLICATION_LIST_LIMIT: usize = 30;

/// Quote a string literal for an OData `$filter` expression.
///
/// Embedded single quotes are doubled so the value cannot terminate the
/// literal early.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Check an identifier that is interpolated into a filter without quotes.
fn checked_id<'a>(kind: &str, id: &'a str) -> AppScanResult<&'a str> {
    let id = id.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        Ok(id)
    } else {
        Err(AppScanError::NotFound(format!("Invalid {} id: {:?}", kind, id)))
    }
}

/// Client for the AppScan v4 REST API.
#[derive(Debug, Clone)]
pub struct AppScanClient {
    /// HTTP client (carries the request timeout).
    http: reqwest::Client,
    /// Versioned API root, e.g. `https://cloud.appscan.com/api/v4`.
    api_url: String,
    /// Shared bearer credential.
    credentials: Arc<CredentialCache>,
}

impl AppScanClient {
    /// Build a client and its credential cache from configuration.
    pub fn new(config: &AppScanConfig) -> AppScanResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout());

        if config.allow_untrusted() {
            warn!(
                "TLS certificate verification is disabled for AppScan. This is insecure and meant for testing only."
            );
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| AppScanError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let api_url = config.api_url();
        let credentials = Arc::new(CredentialCache::new(
            http.clone(),
            &api_url,
            config.key_id(),
            config.key_secret(),
        ));

        Ok(Self::with_credentials(http, api_url, credentials))
    }

    /// Build a client around an existing credential cache.
    pub fn with_credentials(
        http: reqwest::Client,
        api_url: impl Into<String>,
        credentials: Arc<CredentialCache>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Versioned API root.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Shared credential cache.
    pub fn credentials(&self) -> &Arc<CredentialCache> {
        &self.credentials
    }

    /// Look up an application by exact name.
    pub async fn find_application_by_name(&self, name: &str) -> AppScanResult<AppRecord> {
        let filter = format!("Name eq {}", quote_literal(name));
        let apps: Vec<AppRecord> = self
            .get_items("/Apps", &[("$filter", filter), ("$top", "1".to_string())])
            .await?;

        apps.into_iter()
            .next()
            .ok_or_else(|| AppScanError::NotFound(format!("Application not found: {}", name)))
    }

    /// First applications visible to the API key.
    pub async fn list_applications(&self) -> AppScanResult<Vec<AppRecord>> {
        self.get_items("/Apps", &[("$top", APPLICATION_LIST_LIMIT.to_string())])
            .await
    }

    /// Most recently created scan of an application, if it has any.
    pub async fn latest_scan_for_application(
        &self,
        app_id: &str,
    ) -> AppScanResult<Option<ScanRecord>> {
        let app_id = checked_id("application", app_id)?;
        let scans: Vec<ScanRecord> = self
            .get_items(
                "/Scans",
                &[
                    ("$top", "1".to_string()),
                    ("$filter", format!("AppId eq {}", app_id)),
                    ("$orderby", "CreatedAt desc".to_string()),
                ],
            )
            .await?;

        Ok(scans.into_iter().next())
    }

    /// Name/id of scans created by a user.
    pub async fn scans_by_user(
        &self,
        username: &str,
        limit: usize,
    ) -> AppScanResult<Vec<ScanListing>> {
        let filter = format!("CreatedBy/UserName eq {}", quote_literal(username));
        self.get_items("/Scans", &[("$filter", filter), ("$top", limit.to_string())])
            .await
    }

    /// A single scan with its latest execution.
    pub async fn scan_summary_by_id(&self, scan_id: &str) -> AppScanResult<Option<ScanRecord>> {
        let scan_id = checked_id("scan", scan_id)?;
        let scans: Vec<ScanRecord> = self
            .get_items(
                "/Scans",
                &[
                    ("$filter", format!("Id eq {}", scan_id)),
                    ("$top", "1".to_string()),
                ],
            )
            .await?;

        Ok(scans.into_iter().next())
    }

    /// Start rendering a security report for a scan. Returns the report id.
    pub async fn create_report(
        &self,
        scan_id: &str,
        configuration: &ReportConfiguration,
    ) -> AppScanResult<String> {
        let scan_id = checked_id("scan", scan_id)?;
        let url = format!(
            "{}/Reports/Security/Scan/{}",
            self.api_url,
            urlencoding::encode(scan_id)
        );
        let body = serde_json::json!({ "Configuration": configuration });

        let request = self.http.post(&url).json(&body);
        let created: CreatedReport = self.send_json(request, "create report").await?;

        created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppScanError::Backend("Report creation returned no Id".to_string()))
    }

    /// Current status of a report job.
    pub async fn report_status(&self, report_id: &str) -> AppScanResult<Option<ReportStatus>> {
        let report_id = checked_id("report", report_id)?;
        let reports: Vec<ReportStatus> = self
            .get_items(
                "/Reports",
                &[
                    ("$filter", format!("Id eq {}", report_id)),
                    ("$count", "false".to_string()),
                ],
            )
            .await?;

        Ok(reports.into_iter().next())
    }

    /// GET a list endpoint and unwrap its `Items`.
    async fn get_items<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> AppScanResult<Vec<T>> {
        let url = format!("{}{}", self.api_url, path);
        let request = self.http.get(&url).query(query);
        let response: ItemsResponse<T> = self.send_json(request, path).await?;
        Ok(response.items)
    }

    /// Attach the bearer credential, send, and decode a JSON body.
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> AppScanResult<T> {
        let credential = self.credentials.get_valid_credential().await?;

        let started = Instant::now();
        let response = request.bearer_auth(credential.value()).send().await?;
        let status = response.status();
        debug!(
            endpoint = %what,
            %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "AppScan request completed"
        );

        if status == StatusCode::UNAUTHORIZED {
            // The token was revoked early; make the next caller log in again.
            self.credentials.invalidate_if_current(&credential);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppScanError::Backend(format!(
                "{} failed with status {}: {}",
                what, status, body
            )));
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
