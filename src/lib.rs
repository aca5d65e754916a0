//! portfwd Library
//!
//! TCP port-forwarding proxy: every connection accepted on the local port is
//! paired with a fresh connection to a fixed remote endpoint and bytes are
//! relayed in both directions until either side closes or fails.

pub mod config;
pub mod connection;
pub mod error;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use connection::{run, ConnectionManager};
pub use error::ProxyError;
pub use relay::{ConnectionSession, StreamRelay};
pub use shutdown::ShutdownCoordinator;

/// Common error type for the proxy
pub type Result<T> = anyhow::Result<T>;
