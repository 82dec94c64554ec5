//! Integration tests for the full Config::load pipeline.
//!
//! These tests exercise the end-to-end flow: TOML file -> parse -> environment
//! overrides and ${VAR} expansion -> validation.
//!
//! Each test uses unique file names and env var names to avoid parallel test interference.

use degpt_gateway::config::{Config, ConfigError};
use std::fs;
use tokio_test::{assert_err, assert_ok};

/// Test that ${VAR} references in secrets are expanded from the environment.
#[test]
fn test_env_expansion_resolves_var() {
    let var_name = "TEST_DEGPT_E2E_01_CLIENT";
    let var_value = "client-from-env";
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("gateway.toml");

    unsafe { std::env::set_var(var_name, var_value) };

    let toml_content = format!(
        r#"
[server]
listen = "127.0.0.1:19876"

[upstream]
client_id = "${{{}}}"
default_model = "deepseek-r1"
"#,
        var_name
    );
    fs::write(&config_path, toml_content).expect("Failed to write temp config");

    let config = assert_ok!(Config::load(&config_path));

    assert_eq!(config.upstream.client_id.expose_secret(), var_value);
    assert_eq!(config.upstream.default_model, "deepseek-r1");
    assert_eq!(config.server.listen, "127.0.0.1:19876");

    unsafe { std::env::remove_var(var_name) };
}

/// Test that a reference to an unset variable fails with a clear error.
#[test]
fn test_env_expansion_missing_var_errors() {
    let var_name = "TEST_DEGPT_E2E_02_NEVER_SET";
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("gateway.toml");

    unsafe { std::env::remove_var(var_name) };

    let toml_content = format!(
        r#"
[server]
auth_token = "${{{}}}"
"#,
        var_name
    );
    fs::write(&config_path, toml_content).expect("Failed to write temp config");

    match assert_err!(Config::load(&config_path)) {
        ConfigError::EnvVar { var, field, .. } => {
            assert_eq!(var, var_name);
            assert_eq!(field, "server.auth_token");
        }
        other => panic!("expected EnvVar error, got {:?}", other),
    }
}

/// Test that a missing file yields the built-in defaults.
#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::load(dir.path().join("absent.toml")).expect("defaults should load");

    assert_eq!(config.server.listen, "0.0.0.0:7860");
    assert!(!config.upstream.endpoints.is_empty());
    assert_eq!(config.registry.cache_duration_secs, 14400);
    assert_eq!(config.session.ttl_secs, 3600);
}

/// Test that every section parses from a complete file.
#[test]
fn test_full_file_parses() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("full.toml");

    fs::write(
        &config_path,
        r#"
[server]
listen = "127.0.0.1:8080"
chat_paths = ["/chat", "/hf/v1/chat/completions"]
maintenance_interval_secs = 15

[upstream]
endpoints = ["https://a.example/api", "https://b.example/api"]
auth_url = "https://a.example/auth"
project = "Test"
request_timeout_secs = 30

[registry]
config_url = "https://a.example/config"
site_root = "https://a.example/"
crawl_enabled = false
cache_duration_secs = 60

[health]
cooldown_secs = 10

[session]
ttl_secs = 120

[logging]
level = "debug"
"#,
    )
    .expect("Failed to write temp config");

    let config = Config::from_file(&config_path).expect("valid config");
    assert_eq!(config.server.chat_paths, vec!["/chat", "/hf/v1/chat/completions"]);
    assert_eq!(config.server.maintenance_interval_secs, 15);
    assert_eq!(config.upstream.endpoints.len(), 2);
    assert_eq!(config.upstream.project, "Test");
    assert!(!config.registry.crawl_enabled);
    assert_eq!(config.health.cooldown_secs, 10);
    assert_eq!(config.session.ttl_secs, 120);
    assert_eq!(config.logging.level, "debug");
}

/// Test that invalid values are rejected at load time.
#[test]
fn test_invalid_file_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("bad.toml");

    fs::write(
        &config_path,
        r#"
[upstream]
endpoints = []
"#,
    )
    .expect("Failed to write temp config");

    assert!(matches!(
        Config::from_file(&config_path),
        Err(ConfigError::Validation(_))
    ));

    fs::write(&config_path, "[session\nttl_secs = ").expect("Failed to write temp config");
    assert!(matches!(
        Config::from_file(&config_path),
        Err(ConfigError::Parse(_))
    ));
}
