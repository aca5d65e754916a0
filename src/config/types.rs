//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub listen: ListenConfig,
    pub remote: RemoteConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

/// Local listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenConfig {
    pub bind_ip: Ipv4Addr,
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Remote endpoint every session is forwarded to
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    /// No timeout when unset.
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Option<Duration>,
}

/// Per-direction relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    pub buffer_size: usize,
    pub dump_payload: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_ip: Ipv4Addr::UNSPECIFIED,
            port: 4444,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12345,
            dial_timeout: None,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            dump_payload: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ListenConfig {
    /// Address the listener binds to
    pub fn bind_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.bind_ip, self.port)
    }
}

impl RemoteConfig {
    /// `host:port` as handed to the resolver
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_forwarder_defaults() {
        let config = Config::default();
        assert_eq!(config.listen.bind_addr().to_string(), "0.0.0.0:4444");
        assert_eq!(config.remote.endpoint(), "127.0.0.1:12345");
        assert_eq!(config.remote.dial_timeout, None);
        assert_eq!(config.relay.buffer_size, 1024);
        assert!(!config.relay.dump_payload);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [remote]
            host = "10.1.2.3"
            dial_timeout = "5s"
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.host, "10.1.2.3");
        assert_eq!(config.remote.port, 12345);
        assert_eq!(config.remote.dial_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.listen.port, 4444);
    }
}
