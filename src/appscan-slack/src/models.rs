//! AppScan REST payloads and the domain records built from them.
//!
//! The API speaks PascalCase JSON and adds fields freely, so every record
//! ignores unknown keys and tolerates missing ones.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Execution status that marks a scan (or report) as finished.
pub const READY_STATUS: &str = "Ready";

/// Whether an open-ended status string means "finished".
pub fn is_ready_status(status: &str) -> bool {
    status.eq_ignore_ascii_case(READY_STATUS)
}

/// Bearer credential issued by `Account/ApiKeyLogin`.
///
/// Never mutated; a refresh replaces the whole value.
#[derive(Clone)]
pub struct Credential {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// Create a credential.
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: SecretString::new(value.into().into()),
            expires_at,
        }
    }

    /// Token value for the `Authorization` header.
    pub fn value(&self) -> &str {
        self.value.expose_secret()
    }

    /// Absolute expiry.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Usable only while `now + skew < expires_at`.
    pub fn is_usable_at(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        now + skew < self.expires_at
    }
}

/// Raw login response. Both fields are checked before a [`Credential`] is built.
#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    #[serde(rename = "Token")]
    pub token: Option<String>,
    #[serde(rename = "Expire")]
    pub expire: Option<DateTime<Utc>>,
}

/// Wrapper used by every list endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ItemsResponse<T> {
    #[serde(rename = "Items", default = "Vec::new")]
    pub items: Vec<T>,
}

/// An AppScan application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AppRecord {
    pub id: String,
    pub name: String,
    pub risk_rating: Option<String>,
    pub total_issues: u32,
    pub critical_issues: u32,
    pub high_issues: u32,
    pub medium_issues: u32,
    pub low_issues: u32,
    pub new_issues: u32,
    pub open_issues: u32,
    pub issues_in_progress: u32,
    pub business_impact: Option<String>,
    pub created_by: Option<String>,
    pub date_created: Option<String>,
    pub overall_compliance: Option<String>,
    pub testing_status: Option<String>,
}

/// Who created a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CreatedBy {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub user_name: Option<String>,
    pub email: Option<String>,
}

impl CreatedBy {
    /// "First Last", skipping missing parts.
    pub fn full_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Status and issue counts of a scan's most recent execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatestExecution {
    #[serde(rename = "Status")]
    pub status: Option<String>,
    #[serde(rename = "NIssuesFound")]
    pub issues_found: u32,
    #[serde(rename = "NCriticalIssues")]
    pub critical_issues: u32,
    #[serde(rename = "NHighIssues")]
    pub high_issues: u32,
    #[serde(rename = "NMediumIssues")]
    pub medium_issues: u32,
    #[serde(rename = "NLowIssues")]
    pub low_issues: u32,
    #[serde(rename = "NInfoIssues")]
    pub info_issues: u32,
}

/// A scan with its latest execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ScanRecord {
    pub id: String,
    pub app_name: String,
    pub name: String,
    pub technology: Option<String>,
    pub created_at: Option<String>,
    pub created_by: Option<CreatedBy>,
    /// Absent until the scan has executed at least once.
    pub latest_execution: Option<LatestExecution>,
}

impl ScanRecord {
    /// Latest execution status, if any.
    pub fn status(&self) -> Option<&str> {
        self.latest_execution
            .as_ref()
            .and_then(|e| e.status.as_deref())
    }

    /// Whether the latest execution finished.
    pub fn is_ready(&self) -> bool {
        self.status().is_some_and(is_ready_status)
    }
}

/// Name/id projection returned by the scans-by-user query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ScanListing {
    pub name: String,
    pub id: String,
}

/// Report job id returned on creation.
#[derive(Debug, Deserialize)]
pub(crate) struct CreatedReport {
    #[serde(rename = "Id")]
    pub id: Option<String>,
}

/// Options sent when creating a security report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportConfiguration {
    pub report_file_type: String,
    pub summary: bool,
    pub details: bool,
    pub discussion: bool,
    pub overview: bool,
    pub table_of_content: bool,
    pub history: bool,
    pub coverage: bool,
    pub minimize_details: bool,
    pub articles: bool,
    pub title: String,
}

impl ReportConfiguration {
    /// Full PDF report titled `"<scan name> - <timestamp>"`.
    pub fn pdf(scan_name: &str, generated_at: DateTime<Utc>) -> Self {
        Self {
            report_file_type: "Pdf".to_string(),
            summary: true,
            details: true,
            discussion: true,
            overview: true,
            table_of_content: true,
            history: true,
            coverage: true,
            minimize_details: true,
            articles: true,
            title: format!("{} - {}", scan_name, generated_at.to_rfc3339()),
        }
    }
}

/// Status of a report job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReportStatus {
    pub id: String,
    pub status: String,
    pub download_link: Option<String>,
}

impl ReportStatus {
    /// Whether the report has been rendered.
    pub fn is_ready(&self) -> bool {
        is_ready_status(&self.status)
    }
}
