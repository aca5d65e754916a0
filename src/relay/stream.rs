//! Stream Relay
//!
//! Moves bytes from one connection to another in a single direction until
//! the source ends, an I/O operation fails, or the owning session closes the
//! connections. The relay never closes anything itself: it hands the stream
//! halves back to the session when it stops.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use super::dump::hex_dump;
use super::{Direction, SessionStats, SignalReport, TerminalSignal};
use crate::config::RelayConfig;

/// Closed state of a session's connections, as seen by its relays
#[derive(Debug, Clone)]
pub struct CloseSignal {
    rx: watch::Receiver<bool>,
}

/// Create the closer held by a session and the signal handed to its relays
pub fn close_channel() -> (watch::Sender<bool>, CloseSignal) {
    let (tx, rx) = watch::channel(false);
    (tx, CloseSignal { rx })
}

impl CloseSignal {
    /// Resolve once the connections are closed or the session is gone
    pub async fn closed(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// One direction of a session
pub struct StreamRelay {
    direction: Direction,
    buffer_size: usize,
    dump_payload: bool,
    label: String,
    stats: Option<Arc<SessionStats>>,
}

impl StreamRelay {
    pub fn new(direction: Direction, config: &RelayConfig) -> Self {
        Self {
            direction,
            buffer_size: config.buffer_size.max(1),
            dump_payload: config.dump_payload,
            label: direction.to_string(),
            stats: None,
        }
    }

    /// Label used for per-chunk records, normally `<src local> -> <dst local>`
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_stats(mut self, stats: Arc<SessionStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Relay until a terminal condition, report it exactly once, and give the
    /// source and destination back to the caller.
    pub async fn run<R, W>(
        self,
        mut src: R,
        mut dst: W,
        mut close: CloseSignal,
        signals: mpsc::Sender<SignalReport>,
    ) -> (R, W)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let signal = tokio::select! {
            biased;
            signal = self.pump(&mut src, &mut dst) => signal,
            _ = close.closed() => TerminalSignal::IoFailure(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed by session",
            )),
        };

        debug!(direction = %self.direction, %signal, "Relay stopped");

        let report = SignalReport {
            direction: self.direction,
            signal,
        };
        if let Err(e) = signals.try_send(report) {
            debug!(direction = %self.direction, "Terminal signal not delivered: {}", e);
        }

        (src, dst)
    }

    async fn pump<R, W>(&self, src: &mut R, dst: &mut W) -> TerminalSignal
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::with_capacity(self.buffer_size);

        loop {
            buf.clear();
            let n = match src.read_buf(&mut buf).await {
                Ok(0) => return TerminalSignal::EndOfStream,
                Ok(n) => n,
                Err(e) => return TerminalSignal::IoFailure(e),
            };

            if let Err(e) = dst.write_all(&buf[..n]).await {
                return TerminalSignal::IoFailure(e);
            }
            if let Err(e) = dst.flush().await {
                return TerminalSignal::IoFailure(e);
            }

            if let Some(stats) = &self.stats {
                stats.record(self.direction, n);
            }

            trace!(direction = %self.direction, bytes = n, "Forwarded chunk");
            if self.dump_payload {
                debug!("{}\n{}-------------------", self.label, hex_dump(&buf[..n]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::time::{timeout, Duration};

    fn relay(direction: Direction) -> StreamRelay {
        StreamRelay::new(direction, &RelayConfig::default())
    }

    #[tokio::test]
    async fn test_forwards_bytes_then_reports_end_of_stream() {
        let (mut client, relay_src) = duplex(64);
        let (relay_dst, mut sink) = duplex(64);
        let (tx, mut rx) = mpsc::channel(2);
        let (_closer, close) = close_channel();

        let handle = tokio::spawn(relay(Direction::Upstream).run(relay_src, relay_dst, close, tx));

        client.write_all(b"hello").await.unwrap();
        let mut received = [0u8; 5];
        sink.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hello");

        drop(client);

        let report = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.direction, Direction::Upstream);
        assert!(report.signal.is_end_of_stream());

        // The destination half is handed back open.
        let (_src, mut dst) = handle.await.unwrap();
        dst.write_all(b"still open").await.unwrap();
    }

    #[tokio::test]
    async fn test_each_chunk_written_whole_and_in_order() {
        let src = tokio_test::io::Builder::new()
            .read(b"hello")
            .read(b" ")
            .read(b"world")
            .build();
        let dst = tokio_test::io::Builder::new()
            .write(b"hello")
            .write(b" ")
            .write(b"world")
            .build();
        let (tx, mut rx) = mpsc::channel(2);
        let (_closer, close) = close_channel();

        let _halves = relay(Direction::Upstream).run(src, dst, close, tx).await;

        let report = rx.recv().await.unwrap();
        assert!(report.signal.is_end_of_stream());
    }

    #[tokio::test]
    async fn test_read_failure_is_reported_once() {
        let src = tokio_test::io::Builder::new()
            .read(b"abc")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let dst = tokio_test::io::Builder::new().write(b"abc").build();
        let (tx, mut rx) = mpsc::channel(2);
        let (_closer, close) = close_channel();

        let _halves = relay(Direction::Downstream).run(src, dst, close, tx).await;

        let report = rx.recv().await.unwrap();
        assert_eq!(report.direction, Direction::Downstream);
        match report.signal {
            TerminalSignal::IoFailure(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected signal: {}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_large_payload_arrives_in_order_with_dump_enabled() {
        let (mut client, relay_src) = duplex(256);
        let (relay_dst, mut sink) = duplex(256);
        let (tx, mut rx) = mpsc::channel(2);
        let (_closer, close) = close_channel();

        let config = RelayConfig {
            buffer_size: 1024,
            dump_payload: true,
        };
        let stats = Arc::new(SessionStats::new(
            "session-test".to_string(),
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.1:2".parse().unwrap(),
        ));
        let relay = StreamRelay::new(Direction::Downstream, &config).with_stats(stats.clone());
        tokio::spawn(relay.run(relay_src, relay_dst, close, tx));

        let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
        });

        let mut received = vec![0u8; expected.len()];
        timeout(Duration::from_secs(5), sink.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, expected);

        let report = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(report.signal.is_end_of_stream());
        assert_eq!(stats.bytes_down(), 50_000);
        assert_eq!(stats.bytes_up(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_io_failure() {
        let (mut client, relay_src) = duplex(64);
        let (relay_dst, sink) = duplex(64);
        let (tx, mut rx) = mpsc::channel(2);
        let (_closer, close) = close_channel();

        drop(sink);
        tokio::spawn(relay(Direction::Upstream).run(relay_src, relay_dst, close, tx));
        client.write_all(b"data").await.unwrap();

        let report = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(report.signal, TerminalSignal::IoFailure(_)));
    }

    #[tokio::test]
    async fn test_close_unblocks_idle_relay() {
        let (_client, relay_src) = duplex(64);
        let (relay_dst, _sink) = duplex(64);
        let (tx, mut rx) = mpsc::channel(2);
        let (closer, close) = close_channel();

        let handle = tokio::spawn(relay(Direction::Downstream).run(relay_src, relay_dst, close, tx));

        closer.send_replace(true);

        let report = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match report.signal {
            TerminalSignal::IoFailure(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionAborted),
            other => panic!("unexpected signal: {}", other),
        }
        assert!(timeout(Duration::from_secs(2), handle).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_sibling_still_reports_after_failure() {
        let (mut a_client, a_src) = duplex(64);
        let (a_dst, a_sink) = duplex(64);
        let (_b_client, b_src) = duplex(64);
        let (b_dst, _b_sink) = duplex(64);
        let (tx, mut rx) = mpsc::channel(2);
        let (closer, close) = close_channel();

        drop(a_sink);
        tokio::spawn(relay(Direction::Upstream).run(a_src, a_dst, close.clone(), tx.clone()));
        tokio::spawn(relay(Direction::Downstream).run(b_src, b_dst, close, tx));

        a_client.write_all(b"x").await.unwrap();
        let first = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.direction, Direction::Upstream);
        assert!(!first.signal.is_end_of_stream());

        closer.send_replace(true);
        let second = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.direction, Direction::Downstream);

        assert!(rx.recv().await.is_none());
    }
}
