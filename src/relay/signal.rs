//! Terminal signals reported by relays

use std::fmt;
use std::io;

/// Which way a relay moves bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Inbound (client) connection to the remote connection
    Upstream,
    /// Remote connection back to the inbound connection
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => f.write_str("client -> remote"),
            Direction::Downstream => f.write_str("remote -> client"),
        }
    }
}

/// How a relay stopped
#[derive(Debug)]
pub enum TerminalSignal {
    /// The source returned a zero-length read.
    EndOfStream,
    IoFailure(io::Error),
}

impl TerminalSignal {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, TerminalSignal::EndOfStream)
    }
}

impl fmt::Display for TerminalSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalSignal::EndOfStream => f.write_str("end of stream"),
            TerminalSignal::IoFailure(e) => write!(f, "I/O failure: {}", e),
        }
    }
}

/// A terminal signal tagged with the relay that produced it
#[derive(Debug)]
pub struct SignalReport {
    pub direction: Direction,
    pub signal: TerminalSignal,
}
