//! Tests for configuration file loading

use std::io::Write;
use std::time::Duration;

use portfwd::config::ConfigManager;

#[test]
fn test_load_full_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[listen]
bind_ip = "127.0.0.1"
port = 5555
shutdown_timeout = "10s"

[remote]
host = "192.168.0.20"
port = 8080
dial_timeout = "3s"

[relay]
buffer_size = 4096
dump_payload = true

[logging]
level = "debug"
"#
    )
    .unwrap();

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert_eq!(config.listen.bind_addr().to_string(), "127.0.0.1:5555");
    assert_eq!(config.listen.shutdown_timeout, Duration::from_secs(10));
    assert_eq!(config.remote.endpoint(), "192.168.0.20:8080");
    assert_eq!(config.remote.dial_timeout, Some(Duration::from_secs(3)));
    assert_eq!(config.relay.buffer_size, 4096);
    assert!(config.relay.dump_payload);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigManager::load_from_file(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.listen.port, 4444);
    assert_eq!(config.remote.endpoint(), "127.0.0.1:12345");
}

#[test]
fn test_invalid_values_are_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[relay]
buffer_size = 0
"#
    )
    .unwrap();

    assert!(ConfigManager::load_from_file(file.path()).is_err());
}

#[test]
fn test_malformed_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[remote\nport = ").unwrap();

    assert!(ConfigManager::load_from_file(file.path()).is_err());
}

#[test]
fn test_layered_load_reads_file_over_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "[remote]\nport = 9090\n").unwrap();

    let config = ConfigManager::load_layered(file.path()).unwrap();
    assert_eq!(config.remote.port, 9090);
    assert_eq!(config.listen.port, 4444);
    assert_eq!(config.relay.buffer_size, 1024);
}
