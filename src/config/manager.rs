//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Environment over defaults, then the file (when present) over both
    pub fn load_layered(path: &Path) -> Result<Config> {
        let mut base = Config::default();
        Self::apply_env(&mut base)?;

        if !path.exists() {
            tracing::debug!(
                "No configuration file at {}, using environment and defaults",
                path.display()
            );
            base.validate()?;
            return Ok(base);
        }

        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::layer_toml(base, &content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;
        Ok(config)
    }

    /// Overlay the keys set in a TOML document onto `base`
    pub fn layer_toml(base: Config, content: &str) -> Result<Config> {
        let file: toml::Table = toml::from_str(content)?;
        let mut merged = match toml::Value::try_from(&base)? {
            toml::Value::Table(table) => table,
            _ => bail!("configuration did not serialize to a table"),
        };
        overlay(&mut merged, file);
        Ok(toml::Value::Table(merged).try_into()?)
    }

    fn apply_env(config: &mut Config) -> Result<()> {
        if let Ok(port) = std::env::var("PORTFWD_LOCAL_PORT") {
            config.listen.port = parse_port(&port)
                .with_context(|| format!("Invalid PORTFWD_LOCAL_PORT: {}", port))?;
        }

        if let Ok(host) = std::env::var("PORTFWD_REMOTE_HOST") {
            config.remote.host = host;
        }

        if let Ok(port) = std::env::var("PORTFWD_REMOTE_PORT") {
            config.remote.port = parse_port(&port)
                .with_context(|| format!("Invalid PORTFWD_REMOTE_PORT: {}", port))?;
        }

        if let Ok(buffer_size) = std::env::var("PORTFWD_BUFFER_SIZE") {
            config.relay.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid PORTFWD_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(timeout) = std::env::var("PORTFWD_DIAL_TIMEOUT") {
            config.remote.dial_timeout = Some(
                humantime::parse_duration(&timeout)
                    .with_context(|| format!("Invalid PORTFWD_DIAL_TIMEOUT: {}", timeout))?,
            );
        }

        if let Ok(log_level) = std::env::var("PORTFWD_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        Ok(())
    }
}

fn overlay(base: &mut toml::Table, top: toml::Table) {
    for (key, value) in top {
        if let toml::Value::Table(upper) = value {
            if let Some(toml::Value::Table(lower)) = base.get_mut(&key) {
                overlay(lower, upper);
                continue;
            }
            base.insert(key, toml::Value::Table(upper));
        } else {
            base.insert(key, value);
        }
    }
}

/// Parse a port given as a string, the way the invocation contract passes them
pub fn parse_port(value: &str) -> Result<u16> {
    value
        .trim()
        .parse::<u16>()
        .with_context(|| format!("'{}' is not a valid TCP port", value))
}

/// Values given on the command line; `None` leaves the loaded value alone
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub local_port: Option<String>,
    pub remote_host: Option<String>,
    pub remote_port: Option<String>,
    pub buffer_size: Option<usize>,
    pub dial_timeout: Option<Duration>,
    pub verbose: bool,
}

impl Config {
    /// Build a configuration from the three invocation parameters
    pub fn from_invocation(local_port: &str, remote_host: &str, remote_port: &str) -> Result<Self> {
        let mut config = Config::default();
        config.merge_with_cli_args(&CliOverrides {
            local_port: Some(local_port.to_string()),
            remote_host: Some(remote_host.to_string()),
            remote_port: Some(remote_port.to_string()),
            ..CliOverrides::default()
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_remote_config()
            .with_context(|| "Remote configuration validation failed")?;

        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_remote_config(&self) -> Result<()> {
        if self.remote.host.trim().is_empty() {
            bail!("remote.host must not be empty");
        }

        if self.remote.port == 0 {
            bail!("remote.port must be greater than 0");
        }

        if let Some(timeout) = self.remote.dial_timeout {
            if timeout.is_zero() {
                bail!("remote.dial_timeout must be greater than 0 when set");
            }
        }

        Ok(())
    }

    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.buffer_size == 0 {
            bail!("relay.buffer_size must be greater than 0");
        }

        if self.relay.buffer_size > 1048576 {
            bail!("relay.buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!(
                "logging.level must be one of: {}",
                VALID_LOG_LEVELS.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(&mut self, cli: &CliOverrides) -> Result<()> {
        if let Some(port) = &cli.local_port {
            self.listen.port = parse_port(port).context("Invalid local port")?;
            tracing::debug!("CLI override: local port set to {}", self.listen.port);
        }

        if let Some(host) = &cli.remote_host {
            self.remote.host = host.clone();
            tracing::debug!("CLI override: remote host set to {}", host);
        }

        if let Some(port) = &cli.remote_port {
            self.remote.port = parse_port(port).context("Invalid remote port")?;
            tracing::debug!("CLI override: remote port set to {}", self.remote.port);
        }

        if let Some(buffer_size) = cli.buffer_size {
            self.relay.buffer_size = buffer_size;
            tracing::debug!("CLI override: buffer size set to {} bytes", buffer_size);
        }

        if let Some(timeout) = cli.dial_timeout {
            self.remote.dial_timeout = Some(timeout);
            tracing::debug!("CLI override: dial timeout set to {:?}", timeout);
        }

        if cli.verbose {
            self.logging.level = "debug".to_string();
            self.relay.dump_payload = true;
        }

        Ok(())
    }
}
