//! Error taxonomy
//!
//! Only `Listen` is fatal to the process. The other two end a single session
//! and are logged as warnings by the listener.

use std::io;
use std::net::SocketAddr;

use crate::relay::Direction;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    /// Cannot bind or accept on the local port.
    #[error("LISTEN: {addr}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// Cannot open the outbound connection for a session.
    #[error("REMOTE_DIAL: {remote}")]
    RemoteDial {
        remote: String,
        #[source]
        source: io::Error,
    },
    /// A relay hit an I/O failure other than clean end-of-stream.
    #[error("FORWARD_STREAM: {direction}")]
    ForwardStream {
        direction: Direction,
        #[source]
        source: io::Error,
    },
}

impl ProxyError {
    /// Whether the error should stop the listener and exit the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProxyError::Listen { .. })
    }

    /// The underlying I/O error
    pub fn io_error(&self) -> &io::Error {
        match self {
            ProxyError::Listen { source, .. }
            | ProxyError::RemoteDial { source, .. }
            | ProxyError::ForwardStream { source, .. } => source,
        }
    }
}
