//! Outbound dialing
//!
//! Resolves the configured remote endpoint and opens an IPv4 TCP connection
//! to it. Only `tcp4` is used, so IPv6 results from the resolver are ignored.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::RemoteConfig;

/// Opens the outbound connection of each session
#[derive(Debug, Clone)]
pub struct RemoteDialer {
    host: String,
    port: u16,
    dial_timeout: Option<Duration>,
}

impl RemoteDialer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            dial_timeout: None,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            dial_timeout: config.dial_timeout,
        }
    }

    pub fn with_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = Some(dial_timeout);
        self
    }

    /// `host:port` of the remote endpoint
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect to the remote endpoint, trying each resolved IPv4 address in order
    pub async fn dial(&self) -> io::Result<TcpStream> {
        debug!("Dialing remote {}", self.endpoint());

        let addrs = self.resolve().await?;

        let mut last_error = None;
        for addr in addrs {
            match self.connect(addr).await {
                Ok(stream) => {
                    debug!("Connected to remote {}", addr);
                    return Ok(stream);
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no IPv4 address for {}", self.host),
            )
        }))
    }

    async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let lookup = lookup_host((self.host.as_str(), self.port));
        let addrs = match self.dial_timeout {
            Some(limit) => timeout(limit, lookup).await.map_err(|_| timed_out(&self.host))??,
            None => lookup.await?,
        };

        Ok(addrs.filter(SocketAddr::is_ipv4).collect())
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        match self.dial_timeout {
            Some(limit) => timeout(limit, TcpStream::connect(addr))
                .await
                .map_err(|_| timed_out(&addr.to_string()))?,
            None => TcpStream::connect(addr).await,
        }
    }
}

fn timed_out(target: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("dial to {} timed out", target),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dialer = RemoteDialer::new("127.0.0.1", port);
        let stream = dialer.dial().await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_dial_localhost_uses_ipv4() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = RemoteDialer::new("localhost", port).dial().await.unwrap();
        assert!(stream.peer_addr().unwrap().is_ipv4());
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = RemoteDialer::new("127.0.0.1", port)
            .with_timeout(Duration::from_secs(2))
            .dial()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
