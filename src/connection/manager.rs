//! Connection Manager Implementation
//!
//! The listener loop: accepts inbound connections forever and hands each one
//! to its own `ConnectionSession` without waiting on it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ProxyError;
use crate::relay::{ConnectionSession, RemoteDialer};
use crate::Result;

/// Listener statistics
#[derive(Debug, Clone)]
pub struct ListenerStats {
    pub active_sessions: usize,
    pub total_sessions_served: usize,
    pub failed_sessions: usize,
}

/// Accepts inbound connections and spawns a session for each
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    dialer: RemoteDialer,
    active_sessions: Arc<AtomicUsize>,
    failed_sessions: Arc<AtomicUsize>,
    next_session_id: AtomicUsize,
    shutdown_flag: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(config: Arc<Config>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let dialer = RemoteDialer::from_config(&config.remote);

        Self {
            listener: None,
            config,
            dialer,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            failed_sessions: Arc::new(AtomicUsize::new(0)),
            next_session_id: AtomicUsize::new(1),
            shutdown_flag: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Bind the IPv4 listener and return the bound address
    pub async fn bind(&mut self) -> std::result::Result<SocketAddr, ProxyError> {
        let bind_addr = SocketAddr::V4(self.config.listen.bind_addr());
        debug!("Listening on {}", bind_addr);

        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ProxyError::Listen {
                addr: bind_addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ProxyError::Listen {
                addr: bind_addr,
                source,
            })?;

        info!("Forwarding {} -> {}", local_addr, self.dialer.endpoint());
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Bind if needed, then accept connections until shutdown or a fatal error
    pub async fn start(&mut self) -> std::result::Result<(), ProxyError> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        self.accept_connections().await
    }

    /// Main connection acceptance loop
    pub async fn accept_connections(&self) -> std::result::Result<(), ProxyError> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(ProxyError::Listen {
                addr: SocketAddr::V4(self.config.listen.bind_addr()),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "listener not bound",
                ),
            });
        };
        let listen_addr = listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::V4(self.config.listen.bind_addr()));

        info!("Starting connection acceptance loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown flag set, stopping connection acceptance");
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, addr) = accept_result.map_err(|source| ProxyError::Listen {
                        addr: listen_addr,
                        source,
                    })?;
                    debug!("Accepted connection from {}", addr);
                    self.spawn_session(stream, addr);
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    self.shutdown_flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    fn spawn_session(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let session_id = format!(
            "session-{}",
            self.next_session_id.fetch_add(1, Ordering::Relaxed)
        );
        let session = ConnectionSession::new(
            session_id.clone(),
            self.dialer.clone(),
            self.config.relay.clone(),
        );
        let active_sessions = Arc::clone(&self.active_sessions);
        let failed_sessions = Arc::clone(&self.failed_sessions);

        active_sessions.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            let start_time = Instant::now();
            match session.run(stream).await {
                Ok(summary) => {
                    debug!(
                        "Session {} finished after {} ms: {} bytes up, {} bytes down",
                        session_id,
                        summary.stats.duration_ms,
                        summary.stats.bytes_up,
                        summary.stats.bytes_down
                    );
                }
                Err(e) => {
                    failed_sessions.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Session {} from {} failed: {}: {}",
                        session_id,
                        addr,
                        e,
                        e.io_error()
                    );
                }
            }

            debug!(
                "Session {} from {} closed after {:?}",
                session_id,
                addr,
                start_time.elapsed()
            );
            active_sessions.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Get the number of active sessions
    pub fn get_active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Get the bind address if listener is initialized
    pub fn get_bind_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Get listener statistics
    pub fn get_stats(&self) -> ListenerStats {
        ListenerStats {
            active_sessions: self.get_active_sessions(),
            total_sessions_served: self
                .next_session_id
                .load(Ordering::Relaxed)
                .saturating_sub(1),
            failed_sessions: self.failed_sessions.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting new connections
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection manager");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("No acceptance loop to notify of shutdown: {}", e);
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Wait for active sessions to finish, up to `shutdown_timeout`
    pub async fn wait_for_sessions_to_close(&self, shutdown_timeout: Duration) -> Result<()> {
        let start_time = Instant::now();

        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            self.get_active_sessions(),
            shutdown_timeout
        );

        while self.get_active_sessions() > 0 && start_time.elapsed() < shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.get_active_sessions();
        if remaining == 0 {
            info!("All sessions closed in {:?}", start_time.elapsed());
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                start_time.elapsed(),
                remaining
            );
        }

        Ok(())
    }

    /// Gracefully shutdown the connection manager
    pub async fn shutdown(&self) -> Result<()> {
        self.initiate_shutdown();
        self.wait_for_sessions_to_close(self.config.listen.shutdown_timeout)
            .await
    }
}

/// Listen on `local_port` and forward every connection to
/// `remote_host:remote_port`. Only returns on a fatal error.
pub async fn run(local_port: &str, remote_host: &str, remote_port: &str) -> Result<()> {
    let config = Config::from_invocation(local_port, remote_host, remote_port)?;
    let mut manager = ConnectionManager::new(Arc::new(config));
    manager.start().await?;
    Ok(())
}
