//! Error types for the AppScan integration.
//!
//! Every fallible operation in the crate returns [`AppScanResult`]. The
//! variants mirror how callers react: authentication and backend failures
//! are worth another try on the next poll tick, lookups that matched
//! nothing and exhausted report jobs are terminal for that request.

use thiserror::Error;

/// Errors that can occur while talking to AppScan or delivering results.
#[derive(Error, Debug)]
pub enum AppScanError {
    /// Credential refresh was rejected or returned a malformed payload.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A lookup matched nothing (unknown application name, scan id, ...).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport failure, non-success status or unexpected payload shape.
    #[error("AppScan API error: {0}")]
    Backend(String),

    /// A report job never reached `Ready` within its attempt budget.
    #[error("Report for scan {scan_id} not ready after {attempts} attempts")]
    ReportTimeout {
        /// Scan the report was requested for.
        scan_id: String,
        /// Number of status checks performed.
        attempts: u32,
    },

    /// The caller abandoned an in-flight operation.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Configuration error (missing or invalid setting).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Slack rejected or failed to deliver a message.
    #[error("Slack delivery error: {0}")]
    Slack(String),
}

impl AppScanError {
    /// Whether the same call may succeed if attempted again later.
    ///
    /// The scan poller relies on this only for logging; its retry is the
    /// next scheduled tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppScanError::Auth(_) | AppScanError::Backend(_) | AppScanError::Slack(_)
        )
    }
}

impl From<reqwest::Error> for AppScanError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppScanError::Backend(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            AppScanError::Backend(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            AppScanError::Backend(format!("Malformed response body: {}", err))
        } else {
            AppScanError::Backend(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppScanError {
    fn from(err: serde_json::Error) -> Self {
        AppScanError::Backend(format!("Unexpected payload: {}", err))
    }
}

impl From<std::env::VarError> for AppScanError {
    fn from(err: std::env::VarError) -> Self {
        AppScanError::Config(format!("Environment variable error: {}", err))
    }
}

/// Result type for AppScan operations.
pub type AppScanResult<T> = std::result::Result<T, AppScanError>;
