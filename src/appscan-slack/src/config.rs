//! Configuration for the AppScan integration.
//!
//! Everything is loaded from environment variables:
//! - `APPSCAN_API_BASEURL` - AppScan root URL (e.g. `https://cloud.appscan.com`)
//! - `APPSCAN_API_KEY` / `APPSCAN_API_SECRET` - API key pair
//! - `APPSCAN_ALLOW_UNTRUSTED` - skip TLS certificate verification (testing only)
//! - `APPSCAN_POLLER_RATE_MS` - scan poller tick interval
//! - `APPSCAN_REQUEST_TIMEOUT_SECS` - per-request timeout
//! - `APPSCAN_APP_CHANNEL_MAPPING` - `App:channel1,channel2;Other:channel3`
//! - `APPSCAN_APP_USER_MAPPING` - same syntax, user ids for direct messages
//! - `SLACK_BOT_TOKEN` - bot OAuth token (xoxb-...)

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::error::{AppScanError, AppScanResult};

/// Default interval between scan poller ticks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Default timeout applied to every backend request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default Slack Web API root.
pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";

/// Connection settings for the AppScan backend.
#[derive(Clone)]
pub struct AppScanConfig {
    /// AppScan root URL, without the API version suffix.
    base_url: String,
    /// API key id.
    key_id: String,
    /// API key secret.
    key_secret: SecretString,
    /// Accept invalid TLS certificates.
    allow_untrusted: bool,
    /// Scan poller tick interval.
    poll_interval: Duration,
    /// Per-request timeout.
    request_timeout: Duration,
}

impl std::fmt::Debug for AppScanConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppScanConfig")
            .field("base_url", &self.base_url)
            .field("key_id", &self.key_id)
            .field("key_secret", &"[REDACTED]")
            .field("allow_untrusted", &self.allow_untrusted)
            .field("poll_interval", &self.poll_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl AppScanConfig {
    /// Create a configuration with the required connection settings.
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: SecretString::new(key_secret.into().into()),
            allow_untrusted: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Accept invalid TLS certificates.
    pub fn with_allow_untrusted(mut self, allow: bool) -> Self {
        self.allow_untrusted = allow;
        self
    }

    /// Set the scan poller tick interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> AppScanResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> AppScanResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppScanError::Config(format!("{} not set", key)))
        };

        let mut config = Self::new(
            required("APPSCAN_API_BASEURL")?,
            required("APPSCAN_API_KEY")?,
            required("APPSCAN_API_SECRET")?,
        );

        if let Some(raw) = lookup("APPSCAN_ALLOW_UNTRUSTED") {
            config.allow_untrusted = parse_bool(&raw).ok_or_else(|| {
                AppScanError::Config(format!("APPSCAN_ALLOW_UNTRUSTED is not a boolean: {}", raw))
            })?;
        }

        if let Some(raw) = lookup("APPSCAN_POLLER_RATE_MS") {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                AppScanError::Config(format!("APPSCAN_POLLER_RATE_MS is not a number: {}", raw))
            })?;
            config.poll_interval = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup("APPSCAN_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                AppScanError::Config(format!(
                    "APPSCAN_REQUEST_TIMEOUT_SECS is not a number: {}",
                    raw
                ))
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> AppScanResult<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(AppScanError::Config(format!(
                "Base URL must be http(s): {}",
                self.base_url
            )));
        }
        if self.key_id.is_empty() {
            return Err(AppScanError::Config("API key id is empty".to_string()));
        }
        if self.key_secret.expose_secret().is_empty() {
            return Err(AppScanError::Config("API key secret is empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(AppScanError::Config(
                "Poll interval must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(AppScanError::Config(
                "Request timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// AppScan root URL (used for links back into the web UI).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Root of the versioned REST API.
    pub fn api_url(&self) -> String {
        format!("{}/api/v4", self.base_url)
    }

    /// API key id.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// API key secret.
    pub fn key_secret(&self) -> &str {
        self.key_secret.expose_secret()
    }

    /// Whether invalid TLS certificates are accepted.
    pub fn allow_untrusted(&self) -> bool {
        self.allow_untrusted
    }

    /// Scan poller tick interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Application name to notification targets (channels or user ids).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppMappings {
    targets: BTreeMap<String, Vec<String>>,
}

impl AppMappings {
    /// Parse `App1:target1,target2;App2:target3`.
    ///
    /// Entries without exactly one `:` are skipped, as are blank targets.
    pub fn parse(raw: &str) -> Self {
        let mut targets = BTreeMap::new();

        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let parts: Vec<&str> = entry.split(':').collect();
            if parts.len() != 2 {
                warn!(entry = %entry, "Skipping malformed application mapping entry");
                continue;
            }

            let app = parts[0].trim();
            if app.is_empty() {
                warn!(entry = %entry, "Skipping application mapping without a name");
                continue;
            }

            let list: Vec<String> = parts[1]
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();

            targets.insert(app.to_string(), list);
        }

        Self { targets }
    }

    /// Targets for an application (empty if unmapped).
    pub fn targets_for(&self, app: &str) -> &[String] {
        self.targets.get(app).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Applications that have at least one target.
    pub fn app_names(&self) -> BTreeSet<String> {
        self.targets
            .iter()
            .filter(|(_, targets)| !targets.is_empty())
            .map(|(app, _)| app.clone())
            .collect()
    }

    /// Whether no application has a target.
    pub fn is_empty(&self) -> bool {
        self.targets.values().all(Vec::is_empty)
    }
}

/// Slack connection settings and routing tables.
#[derive(Clone)]
pub struct SlackSettings {
    /// Bot OAuth token (xoxb-...).
    bot_token: SecretString,
    /// Web API root.
    api_base_url: String,
    /// Application to channel ids.
    pub channels: AppMappings,
    /// Application to user ids.
    pub users: AppMappings,
}

impl std::fmt::Debug for SlackSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackSettings")
            .field("bot_token", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .field("channels", &self.channels)
            .field("users", &self.users)
            .finish()
    }
}

impl SlackSettings {
    /// Create settings with a bot token and routing tables.
    pub fn new(bot_token: impl Into<String>, channels: AppMappings, users: AppMappings) -> Self {
        Self {
            bot_token: SecretString::new(bot_token.into().into()),
            api_base_url: DEFAULT_SLACK_API_URL.to_string(),
            channels,
            users,
        }
    }

    /// Override the Web API root.
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Load settings from environment variables.
    pub fn from_env() -> AppScanResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> AppScanResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("SLACK_BOT_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppScanError::Config("SLACK_BOT_TOKEN not set".to_string()))?;

        if !bot_token.starts_with("xoxb-") {
            warn!("Bot token doesn't start with 'xoxb-', this may be incorrect");
        }

        let channels = AppMappings::parse(&lookup("APPSCAN_APP_CHANNEL_MAPPING").unwrap_or_default());
        let users = AppMappings::parse(&lookup("APPSCAN_APP_USER_MAPPING").unwrap_or_default());

        if channels.is_empty() {
            warn!("APPSCAN_APP_CHANNEL_MAPPING is empty, no applications will be monitored");
        }

        Ok(Self::new(bot_token, channels, users))
    }

    /// Applications monitored for completed scans.
    pub fn monitored_apps(&self) -> Vec<String> {
        self.channels.app_names().into_iter().collect()
    }

    /// Bot token.
    pub fn bot_token(&self) -> &str {
        self.bot_token.expose_secret()
    }

    /// Web API root.
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }
}
