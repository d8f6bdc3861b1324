//! Config load error-message and override integration tests.

use std::fs;
use std::path::PathBuf;

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use rstest::rstest;
use tinta_core::{config, ConfigError, DaemonConfig};

// ---------------------------------------------------------------------------
// 1. Missing and empty files
// ---------------------------------------------------------------------------

#[test]
fn load_at_missing_file_yields_defaults() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let config = config::load_at(&dir.path().join("absent.yaml")).expect("defaults");
    assert_eq!(config, DaemonConfig::default());
}

#[test]
fn load_explicit_missing_file_is_not_found() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("absent.yaml");
    let err = config::load(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("absent.yaml"));
}

#[test]
fn load_at_empty_file_yields_defaults() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("config.yaml");
    file.write_str("\n").expect("write");
    let config = config::load_at(file.path()).expect("defaults");
    assert_eq!(config, DaemonConfig::default());
}

// ---------------------------------------------------------------------------
// 2. Partial overrides
// ---------------------------------------------------------------------------

#[test]
fn partial_file_overrides_only_named_fields() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("config.yaml");
    file.write_str(
        "socket_path: /run/tinta.sock\n\
         watchdog_timeout_ms: 30000\n\
         panel:\n  program: /usr/libexec/tinta-panel\n  args: [\"--bus\", \"3\"]\n",
    )
    .expect("write");

    let config = config::load_at(file.path()).expect("load");
    assert_eq!(config.socket_path, PathBuf::from("/run/tinta.sock"));
    assert_eq!(config.watchdog_timeout_ms, 30_000);
    assert_eq!(
        config.panel.program,
        Some(PathBuf::from("/usr/libexec/tinta-panel"))
    );
    assert_eq!(config.panel.args, vec!["--bus".to_string(), "3".to_string()]);
    assert_eq!(config.pid_file, DaemonConfig::default().pid_file);
    assert!(!config.ec.simulate);
}

#[test]
fn rendered_config_reloads_identically() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let mut original = DaemonConfig::default();
    original.ec.simulate = true;
    original.log_level = "debug".to_string();

    let file = dir.child("config.yaml");
    file.write_str(&original.to_yaml().expect("render")).expect("write");
    file.assert(predicate::str::contains("simulate: true"));

    let reloaded = config::load_at(file.path()).expect("reload");
    assert_eq!(reloaded, original);
}

// ---------------------------------------------------------------------------
// 3. Parse and validation errors
// ---------------------------------------------------------------------------

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("config.yaml");
    fs::write(&path, b": : corrupt : yaml : !!!\n  - broken: [unclosed").expect("write");

    let err = config::load_at(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"), "got: {err}");
}

#[test]
fn unknown_field_is_rejected() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("config.yaml");
    fs::write(&path, b"sockett_path: /tmp/typo.sock\n").expect("write");

    let err = config::load_at(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[rstest]
#[case("watchdog_timeout_ms: 0\n", "watchdog_timeout_ms")]
#[case("client:\n  keepalive_interval_ms: 0\n", "keepalive_interval_ms")]
#[case(
    "watchdog_timeout_ms: 1000\nclient:\n  keepalive_interval_ms: 5000\n",
    "must be shorter"
)]
#[case(
    "watchdog_timeout_ms: 5000\npanel:\n  program: /bin/true\n",
    "panel timeout"
)]
fn invalid_values_are_rejected(#[case] yaml: &str, #[case] needle: &str) {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("config.yaml");
    fs::write(&path, yaml).expect("write");

    let err = config::load_at(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
    assert!(err.to_string().contains(needle), "got: {err}");
}
