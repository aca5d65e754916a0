//! Connection Session
//!
//! Owns one accepted inbound connection from accept to close: dials the
//! remote, runs the two relays, waits for the first terminal signal, then
//! closes both connections exactly once on every exit path.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::stream::close_channel;
use super::{
    ConnectionStats, Direction, RemoteDialer, SessionStats, SignalReport, StreamRelay,
    TerminalSignal,
};
use crate::config::RelayConfig;
use crate::error::ProxyError;

/// Two relays, one signal each.
const SIGNAL_CAPACITY: usize = 2;

/// What a finished session reports
#[derive(Debug)]
pub struct SessionSummary {
    pub stats: ConnectionStats,
    /// Every terminal signal received, the end-of-stream that ended the
    /// session first.
    pub signals: Vec<SignalReport>,
}

/// Lifecycle of one proxied connection pair
pub struct ConnectionSession {
    session_id: String,
    dialer: RemoteDialer,
    relay_config: RelayConfig,
}

impl ConnectionSession {
    pub fn new(session_id: impl Into<String>, dialer: RemoteDialer, relay_config: RelayConfig) -> Self {
        Self {
            session_id: session_id.into(),
            dialer,
            relay_config,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Run the session to completion. End-of-stream from either direction is
    /// success; a dial failure or relay I/O failure is returned as an error.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    pub async fn run(self, inbound: TcpStream) -> Result<SessionSummary, ProxyError> {
        let client_addr = peer_or_unspecified(&inbound);

        let outbound = match self.dialer.dial().await {
            Ok(stream) => stream,
            Err(source) => {
                close_connection(inbound, "inbound").await;
                return Err(ProxyError::RemoteDial {
                    remote: self.dialer.endpoint(),
                    source,
                });
            }
        };

        let stats = Arc::new(SessionStats::new(
            self.session_id.clone(),
            client_addr,
            peer_or_unspecified(&outbound),
        ));
        let (up_label, down_label) = relay_labels(&inbound, &outbound);

        let (inbound_read, inbound_write) = inbound.into_split();
        let (outbound_read, outbound_write) = outbound.into_split();
        let (signal_tx, mut signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let (closer, close) = close_channel();

        let upstream = StreamRelay::new(Direction::Upstream, &self.relay_config)
            .with_label(up_label)
            .with_stats(Arc::clone(&stats));
        let downstream = StreamRelay::new(Direction::Downstream, &self.relay_config)
            .with_label(down_label)
            .with_stats(Arc::clone(&stats));

        let upstream = tokio::spawn(upstream.run(
            inbound_read,
            outbound_write,
            close.clone(),
            signal_tx.clone(),
        ));
        let downstream = tokio::spawn(downstream.run(outbound_read, inbound_write, close, signal_tx));

        // A failure moves its error into the result.
        let mut signals = Vec::with_capacity(SIGNAL_CAPACITY);
        let outcome = match signal_rx.recv().await {
            Some(SignalReport {
                direction,
                signal: TerminalSignal::IoFailure(source),
            }) => {
                debug!(%direction, kind = ?source.kind(), "Relay failed, closing session");
                Err(ProxyError::ForwardStream { direction, source })
            }
            Some(report) => {
                debug!(direction = %report.direction, "Found end of stream, closing session");
                signals.push(report);
                Ok(())
            }
            None => Err(ProxyError::ForwardStream {
                direction: Direction::Upstream,
                source: io::Error::new(
                    io::ErrorKind::Other,
                    "relays stopped without reporting",
                ),
            }),
        };

        // Closing wakes whichever relay is still blocked.
        closer.send_replace(true);

        match (upstream.await, downstream.await) {
            (Ok((inbound_read, outbound_write)), Ok((outbound_read, inbound_write))) => {
                match inbound_read.reunite(inbound_write) {
                    Ok(stream) => close_connection(stream, "inbound").await,
                    Err(_) => warn!("Inbound halves did not match, dropping them"),
                }
                match outbound_read.reunite(outbound_write) {
                    Ok(stream) => close_connection(stream, "outbound").await,
                    Err(_) => warn!("Outbound halves did not match, dropping them"),
                }
            }
            (up, down) => {
                // Halves owned by a failed task were dropped with it; the rest drop here.
                for e in [up.err(), down.err()].into_iter().flatten() {
                    warn!("Relay task failed: {}", e);
                }
            }
        }

        while let Ok(report) = signal_rx.try_recv() {
            debug!(direction = %report.direction, signal = %report.signal, "Signal received after shutdown");
            signals.push(report);
        }

        stats.log_stats();

        outcome.map(|()| SessionSummary {
            stats: stats.to_stats(),
            signals,
        })
    }
}

/// Shut the write side down and drop the stream. Consumes the stream so a
/// connection can only be closed once.
async fn close_connection(mut stream: TcpStream, role: &str) {
    if let Err(e) = stream.shutdown().await {
        if e.kind() != io::ErrorKind::NotConnected {
            warn!("Failed to close {} connection: {}", role, e);
        }
    }
}

fn peer_or_unspecified(stream: &TcpStream) -> SocketAddr {
    stream
        .peer_addr()
        .unwrap_or_else(|_| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
}

fn relay_labels(inbound: &TcpStream, outbound: &TcpStream) -> (String, String) {
    let local = |stream: &TcpStream| {
        stream
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "?".to_string())
    };
    let (inbound, outbound) = (local(inbound), local(outbound));
    (
        format!("{} -> {}", inbound, outbound),
        format!("{} -> {}", outbound, inbound),
    )
}
