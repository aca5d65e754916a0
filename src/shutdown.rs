//! Graceful Shutdown Handling
//!
//! Waits for SIGTERM/SIGINT, stops the listener loop and gives in-flight
//! sessions a bounded window to finish.

use std::time::Duration;
use tokio::signal;
use tracing::info;

use crate::connection::ConnectionManager;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve once SIGTERM, SIGINT or Ctrl+C arrives
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        Ok(())
    }

    /// Stop the listener through its shutdown broadcast and wait for its
    /// sessions to drain
    pub async fn shutdown_connection_manager(&self, manager: &ConnectionManager) -> Result<()> {
        manager.initiate_shutdown();
        manager.wait_for_sessions_to_close(self.timeout).await
    }
}
