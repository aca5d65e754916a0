//! Data Relay Module
//!
//! Per-connection forwarding: dialing the remote, the two unidirectional
//! relays and the session that coordinates them.

pub mod dial;
pub mod dump;
pub mod session;
pub mod signal;
pub mod stats;
pub mod stream;

pub use dial::RemoteDialer;
pub use dump::hex_dump;
pub use session::{ConnectionSession, SessionSummary};
pub use signal::{Direction, SignalReport, TerminalSignal};
pub use stats::{ConnectionStats, SessionStats};
pub use stream::{close_channel, CloseSignal, StreamRelay};
