//! Basic dedicated server
//!
//! Connects to the local watchdog, announces readiness and then idles until
//! drained or stopped. SIGINT and SIGTERM run the same shutdown sequence as
//! a drain.

use anyhow::Result;
use clap::Parser;
use match_broker::config::{WatchdogConfig, DEFAULT_WATCHDOG_URL};
use match_broker::dedicated::DedicatedServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// Basic dedicated server for fleet testing
#[derive(Parser)]
#[command(
    name = "basic-ds",
    version,
    about = "Minimal dedicated server that follows the watchdog lifecycle"
)]
struct Args {
    /// Server identifier assigned by the fleet
    #[arg(long, value_name = "ID", help = "Dedicated server ID (passed as ${dsid})")]
    dsid: String,

    /// Game port
    #[arg(long, default_value_t = 7777, help = "Port the game server listens on")]
    port: u16,

    /// Watchdog endpoint
    #[arg(long, default_value = DEFAULT_WATCHDOG_URL, help = "Watchdog WebSocket URL")]
    watchdog_url: String,

    /// Heartbeat interval in seconds
    #[arg(long, default_value_t = 15, help = "Seconds between heartbeats")]
    heartbeat_interval: u64,

    /// Log level
    #[arg(
        short,
        long,
        default_value = "info",
        help = "Log level (trace, debug, info, warn, error)"
    )]
    log_level: String,
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

async fn wait_for_shutdown_signal() {
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
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C) signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let config = WatchdogConfig::new(args.dsid)
        .with_url(args.watchdog_url)
        .with_heartbeat_interval(Duration::from_secs(args.heartbeat_interval));
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let server = Arc::new(DedicatedServer::new(config, args.port));

    let signal_task = {
        let server = server.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            server.stop().await;
        })
    };

    let result = server.start().await;
    signal_task.abort();

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("BasicDS exited cleanly");
    Ok(())
}
