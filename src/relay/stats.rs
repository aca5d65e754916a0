//! Session Statistics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::Direction;

/// Live byte counters for one session, shared with both relays
#[derive(Debug)]
pub struct SessionStats {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

/// Statistics snapshot for a completed session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub session_id: String,
    pub client_addr: SocketAddr,
    pub remote_addr: SocketAddr,
    pub start_time: SystemTime,
    pub duration_ms: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub total_bytes: u64,
}

impl SessionStats {
    pub fn new(session_id: String, client_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            session_id,
            client_addr,
            remote_addr,
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    /// Bytes forwarded client -> remote
    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    /// Bytes forwarded remote -> client
    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_up() + self.bytes_down()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Count a forwarded chunk against its direction
    pub fn record(&self, direction: Direction, bytes: usize) {
        let counter = match direction {
            Direction::Upstream => &self.bytes_up,
            Direction::Downstream => &self.bytes_down,
        };
        counter.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Generate connection statistics
    pub fn to_stats(&self) -> ConnectionStats {
        let duration = self.duration();

        ConnectionStats {
            session_id: self.session_id.clone(),
            client_addr: self.client_addr,
            remote_addr: self.remote_addr,
            start_time: SystemTime::now() - duration,
            duration_ms: duration.as_millis() as u64,
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
            total_bytes: self.total_bytes(),
        }
    }

    /// Log session statistics
    pub fn log_stats(&self) {
        info!(
            session_id = %self.session_id,
            client_addr = %self.client_addr,
            remote_addr = %self.remote_addr,
            duration_ms = self.duration().as_millis() as u64,
            bytes_up = self.bytes_up(),
            bytes_down = self.bytes_down(),
            total_bytes = self.total_bytes(),
            "Session completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_by_direction() {
        let stats = SessionStats::new(
            "session-1".to_string(),
            "127.0.0.1:50000".parse().unwrap(),
            "127.0.0.1:12345".parse().unwrap(),
        );

        stats.record(Direction::Upstream, 5);
        stats.record(Direction::Downstream, 1024);
        stats.record(Direction::Upstream, 3);

        assert_eq!(stats.bytes_up(), 8);
        assert_eq!(stats.bytes_down(), 1024);

        let snapshot = stats.to_stats();
        assert_eq!(snapshot.session_id, "session-1");
        assert_eq!(snapshot.total_bytes, 1032);
        assert_eq!(snapshot.remote_addr.port(), 12345);
    }
}
