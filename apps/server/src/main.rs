//! Voxlink Server - standalone headless voice gateway.
//!
//! Accepts carrier media-stream WebSockets, bridges each call to a realtime
//! model session, and persists call records. Designed to run as a background
//! daemon behind the carrier's webhook configuration.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use voxlink_core::{bootstrap_services, start_server};

use crate::config::ServerConfig;

/// Voxlink Server - telephony-to-model voice gateway.
#[derive(Parser, Debug)]
#[command(name = "voxlink-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "VOXLINK_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "VOXLINK_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Voxlink Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (YAML file + environment overrides)
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }

    let core_config = config.to_core_config();
    // Missing credentials exit non-zero here, before any socket is opened
    core_config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Configuration invalid")?;

    let routing_snapshot = config
        .to_routing_snapshot()
        .context("Failed to build routing table")?;
    if routing_snapshot.agents.is_empty() {
        log::warn!("No agents configured - every call will be refused");
    } else {
        log::info!(
            "Routing table loaded: {} agent(s), {} number mapping(s), {} DNC entries",
            routing_snapshot.agents.len(),
            routing_snapshot.number_map.len(),
            routing_snapshot.dnc.len()
        );
    }

    // Bootstrap services
    let services = bootstrap_services(&core_config, routing_snapshot)
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let app_state = services.app_state(Arc::new(core_config));

    // Spawn the HTTP/WS listener on the main tokio runtime
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: active calls unwind within the cancellation grace
    services.shutdown().await;
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
