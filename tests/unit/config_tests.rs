//! Unit tests for configuration parsing, overrides, and validation.

use std::io::Write;
use std::time::Duration;

use kernel_bridge::{AppError, BridgeConfig};

const FULL: &str = r#"
log_file = "logs/bridge.log"

[engine]
program = "python3"
args = ["-m", "kernel_adapter"]
working_dir = "/srv/work"
startup_timeout_seconds = 12
poll_interval_millis = 250
shutdown_grace_seconds = 2

[engine.env]
PYTHONUNBUFFERED = "1"

[protocol]
acknowledge_control = true
drain_timeout_seconds = 4
"#;

#[test]
fn full_config_parses() {
    let config = BridgeConfig::from_toml_str(FULL).expect("parse");

    assert_eq!(config.log_file.as_deref(), Some(std::path::Path::new("logs/bridge.log")));
    assert_eq!(config.engine.program, "python3");
    assert_eq!(config.engine.args, vec!["-m", "kernel_adapter"]);
    assert_eq!(config.engine.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    assert_eq!(config.engine.startup_timeout(), Duration::from_secs(12));
    assert_eq!(config.engine.poll_interval(), Duration::from_millis(250));
    assert_eq!(config.engine.shutdown_grace(), Duration::from_secs(2));
    assert!(config.protocol.acknowledge_control);
    assert_eq!(config.protocol.drain_timeout(), Duration::from_secs(4));
    config.validate().expect("valid");
}

#[test]
fn empty_config_uses_defaults() {
    let config = BridgeConfig::from_toml_str("").expect("parse");

    assert!(config.log_file.is_none());
    assert_eq!(config.engine.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.engine.startup_timeout(), Duration::from_secs(30));
    assert_eq!(config.engine.shutdown_grace(), Duration::from_secs(5));
    assert!(!config.protocol.acknowledge_control);
    assert_eq!(config.protocol.drain_timeout(), Duration::from_secs(30));
    assert_eq!(config, BridgeConfig::default());
}

#[test]
fn missing_program_fails_validation() {
    let config = BridgeConfig::from_toml_str("").expect("parse");

    let err = config.validate().unwrap_err();

    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("engine.program")));
}

#[test]
fn command_line_engine_overrides_file() {
    let mut config = BridgeConfig::from_toml_str(FULL).expect("parse");

    config.override_engine_command(&["ipykernel-adapter".to_owned(), "--quiet".to_owned()]);

    assert_eq!(config.engine.program, "ipykernel-adapter");
    assert_eq!(config.engine.args, vec!["--quiet"]);
}

#[test]
fn empty_override_keeps_file_command() {
    let mut config = BridgeConfig::from_toml_str(FULL).expect("parse");

    config.override_engine_command(&[]);

    assert_eq!(config.engine.program, "python3");
}

#[test]
fn zero_poll_interval_is_rejected() {
    let mut config = BridgeConfig::from_toml_str(FULL).expect("parse");
    config.engine.poll_interval_millis = 0;

    let err = config.validate().unwrap_err();

    assert!(err.to_string().contains("poll_interval_millis"));
}

#[test]
fn zero_startup_timeout_is_rejected() {
    let mut config = BridgeConfig::from_toml_str(FULL).expect("parse");
    config.engine.startup_timeout_seconds = 0;

    assert!(config.validate().is_err());
}

#[test]
fn invalid_toml_is_a_config_error() {
    let err = BridgeConfig::from_toml_str("[engine\nprogram = ").unwrap_err();

    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn unknown_value_type_is_a_config_error() {
    let err = BridgeConfig::from_toml_str("[engine]\npoll_interval_millis = \"fast\"").unwrap_err();

    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(FULL.as_bytes()).expect("write");

    let config = BridgeConfig::load_from_path(file.path()).expect("load");

    assert_eq!(config.engine.program, "python3");
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().expect("tempdir");

    let err = BridgeConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();

    assert!(err.to_string().contains("failed to read config"));
}
