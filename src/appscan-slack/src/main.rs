//! AppScan Slack - scan completion notifier binary.

use std::process::ExitCode;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use appscan_slack::{AppScanConfig, Service, SlackSettings, run_with_shutdown};

/// AppScan Slack notifier
#[derive(Parser)]
#[command(name = "appscan-slack")]
#[command(about = "Announce completed AppScan scans in Slack")]
#[command(version)]
struct Args {
    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_logs);

    let appscan = match AppScanConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load AppScan config from environment: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let slack = match SlackSettings::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to load Slack config from environment: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.once {
        let service = match Service::build(&appscan, slack) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to start: {}", e);
                return ExitCode::FAILURE;
            }
        };
        let summary = service.run_once().await;
        info!(?summary, "Single poll cycle finished");
        return ExitCode::SUCCESS;
    }

    info!("Press Ctrl+C to stop");
    if let Err(e) = run_with_shutdown(appscan, slack, wait_for_signal()).await {
        error!("Failed to start: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!("Stopped");
    ExitCode::SUCCESS
}
