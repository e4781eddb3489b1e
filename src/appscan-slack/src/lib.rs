//! AppScan integration for Slack.
//!
//! This crate provides:
//! - A credential cache for AppScan API key login with single-flight refresh
//! - A typed client for the AppScan v4 REST API
//! - Report generation with bounded status polling
//! - A scheduled poller that announces each completed scan once
//! - Slack delivery of scan notifications and report links
//!
//! # Example
//!
//! ```rust,ignore
//! use appscan_slack::{AppScanConfig, SlackSettings, run_with_shutdown};
//!
//! let appscan = AppScanConfig::from_env()?;
//! let slack = SlackSettings::from_env()?;
//! run_with_shutdown(appscan, slack, async {
//!     tokio::signal::ctrl_c().await.ok();
//! })
//! .await?;
//! ```
//!
//! # Configuration
//!
//! Required environment variables:
//! - `APPSCAN_API_BASEURL` - AppScan root URL
//! - `APPSCAN_API_KEY` / `APPSCAN_API_SECRET` - API key pair
//! - `SLACK_BOT_TOKEN` - Bot OAuth token (xoxb-...)
//!
//! Optional:
//! - `APPSCAN_APP_CHANNEL_MAPPING` - `App:C1,C2;Other:C3`, defines the monitored apps
//! - `APPSCAN_APP_USER_MAPPING` - same format, extra direct-message recipients
//! - `APPSCAN_POLLER_RATE_MS` - poll interval (default 300000)
//! - `APPSCAN_REQUEST_TIMEOUT_SECS` - HTTP timeout (default 30)
//! - `APPSCAN_ALLOW_UNTRUSTED` - accept invalid TLS certificates

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod models;
pub mod notifier;
pub mod poller;
pub mod report;
pub mod service;
pub mod slack;

pub use auth::CredentialCache;
pub use client::AppScanClient;
pub use config::{AppMappings, AppScanConfig, SlackSettings};
pub use error::{AppScanError, AppScanResult};
pub use models::{AppRecord, Credential, ReportStatus, ScanRecord};
pub use notifier::ScanNotifier;
pub use poller::{DedupState, ScanCompletionPoller, ScanSource, TickSummary};
pub use report::{ReportBackend, ReportJobPoller, ReportPollPolicy};
pub use service::{Service, run_with_shutdown};
pub use slack::SlackNotifier;
