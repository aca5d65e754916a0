//! portfwd - TCP port-forwarding proxy
//!
//! Listens on a local port and forwards every accepted connection to a fixed
//! remote host and port.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portfwd::config::{CliOverrides, ConfigManager, LoggingConfig};
use portfwd::{ConnectionManager, ShutdownCoordinator};

/// CLI arguments for portfwd
#[derive(Parser, Debug)]
#[command(name = "portfwd")]
#[command(about = "portfwd - TCP port-forwarding proxy")]
#[command(version)]
#[command(long_about = "
portfwd - TCP port-forwarding proxy

Every connection accepted on the local port is relayed, byte for byte, to a
new connection to the remote host and port.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  PORTFWD_LOCAL_PORT    - Local port to listen on
  PORTFWD_REMOTE_HOST   - Remote host to forward to
  PORTFWD_REMOTE_PORT   - Remote port to forward to
  PORTFWD_BUFFER_SIZE   - Relay buffer size in bytes
  PORTFWD_DIAL_TIMEOUT  - Remote dial timeout (e.g., 5s)
  PORTFWD_LOG_LEVEL     - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "portfwd.toml")]
    pub config: PathBuf,

    /// Local port to listen on [default: 4444]
    #[arg(long, alias = "local_port")]
    pub local_port: Option<String>,

    /// Remote host to forward to [default: 127.0.0.1]
    #[arg(long, alias = "remote_ip", alias = "remote-host")]
    pub remote_ip: Option<String>,

    /// Remote port to forward to [default: 12345]
    #[arg(long, alias = "remote_port")]
    pub remote_port: Option<String>,

    /// Debug logging and per-chunk payload dumps
    #[arg(short, long)]
    pub verbose: bool,

    /// Relay buffer size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Remote dial timeout (e.g., 5s, 500ms); no timeout when omitted
    #[arg(long, value_parser = humantime::parse_duration)]
    pub dial_timeout: Option<Duration>,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = ConfigManager::load_layered(&args.config)?;

    config.merge_with_cli_args(&CliOverrides {
        local_port: args.local_port.clone(),
        remote_host: args.remote_ip.clone(),
        remote_port: args.remote_port.clone(),
        buffer_size: args.buffer_size,
        dial_timeout: args.dial_timeout,
        verbose: args.verbose,
    })?;

    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&config.logging)?;

    info!("Starting portfwd v{}", env!("CARGO_PKG_VERSION"));

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Listen address: {}", config.listen.bind_addr());
        info!("  Remote endpoint: {}", config.remote.endpoint());
        info!("  Buffer size: {} bytes", config.relay.buffer_size);
        info!("  Dial timeout: {:?}", config.remote.dial_timeout);
        return Ok(());
    }

    let shutdown_coordinator = ShutdownCoordinator::new(config.listen.shutdown_timeout);

    let mut manager = ConnectionManager::new(Arc::new(config));
    manager.bind().await?;
    let manager = Arc::new(manager);

    let serving = Arc::clone(&manager);
    let mut server_handle = tokio::spawn(async move { serving.accept_connections().await });

    tokio::select! {
        result = &mut server_handle => {
            // The loop only ends on its own with a fatal listen/accept error.
            let result = result.context("Listener task failed")?;
            result?;
            return Ok(());
        }
        signal_result = shutdown_coordinator.listen_for_signals() => {
            if let Err(e) = signal_result {
                error!("Error setting up signal handlers: {}", e);
            }
        }
    }

    info!("Initiating graceful shutdown...");
    shutdown_coordinator
        .shutdown_connection_manager(&manager)
        .await?;

    if let Ok(Err(e)) = server_handle.await {
        error!("Listener stopped with error: {}: {}", e, e.io_error());
    }

    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing/logging from the resolved configuration
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true),
        )
        .with(env_filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}
