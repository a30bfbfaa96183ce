//! Main entry point for the match broker
//!
//! Loads configuration, logs in to the platform, then serves client
//! WebSockets and probes until SIGINT or SIGTERM.

use anyhow::Result;
use clap::Parser;
use match_broker::config::{validate_config, AppConfig};
use match_broker::service::{AppState, BrokerServer, BrokerServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Match Broker - FIFO matchmaking with dedicated-server claims
#[derive(Parser)]
#[command(
    name = "match-broker",
    version,
    about = "A FIFO matchmaking broker that claims dedicated servers for matched clients",
    long_about = "Match Broker accepts WebSocket clients, groups them in arrival order, \
                 claims a dedicated server from the fleet for each group and sends the \
                 clients the server address."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// HTTP port override
    #[arg(short, long, value_name = "PORT", help = "Override listening port")]
    port: Option<u16>,

    /// Match size override
    #[arg(long, value_name = "N", help = "Override the number of clients per match")]
    match_size: Option<usize>,

    /// Claim override address
    #[arg(
        long,
        value_name = "HOST:PORT",
        help = "Answer every claim with this address instead of calling the fleet"
    )]
    claim_override: Option<String>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
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

/// Wait for shutdown signals (SIGINT, SIGTERM)
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
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("Match Broker");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Port: {}", config.service.port);
    info!("   Match size: {}", config.matchmaking.match_size);
    info!("   Match interval: {}ms", config.matchmaking.match_interval_ms);
    match &config.claim.override_address {
        Some(address) => info!("   Claims: override ({})", address),
        None => {
            info!("   Claims: {} (namespace {})", config.claim.base_url, config.claim.namespace);
            info!("   Claim keys: {}", config.claim.claim_keys.join(","));
            info!("   Regions: {}", config.claim.regions.join(","));
        }
    }
}

/// Load configuration and apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(port) = args.port {
        config.service.port = port;
    }

    if let Some(match_size) = args.match_size {
        config.matchmaking.match_size = match_size;
    }

    if let Some(address) = &args.claim_override {
        config.claim.override_address = Some(address.clone());
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    // Login failures end up here and abort startup
    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    let server = BrokerServer::new(
        BrokerServerConfig {
            port: config.service.port,
            ..BrokerServerConfig::default()
        },
        app_state.clone(),
    );

    app_state.start().await;
    let mut server_task = tokio::spawn(async move { server.start().await });

    info!("Match Broker is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("Shutdown signal received, beginning graceful shutdown...");
        }
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => warn!("Broker server exited unexpectedly"),
                Ok(Err(e)) => error!("Broker server failed: {}", e),
                Err(e) => error!("Broker server task panicked: {}", e),
            }
            app_state.shutdown().await;
            std::process::exit(1);
        }
    }

    app_state.shutdown().await;

    match tokio::time::timeout(config.shutdown_timeout(), server_task).await {
        Ok(_) => info!("Graceful shutdown completed successfully"),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    info!("Match Broker stopped");
    Ok(())
}
