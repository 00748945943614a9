//! Tests for Config serialization, defaults, overrides and validation

use skipper_config::{
    default_forbidden_commands, AgentConfig, Config, ProviderConfig, RetryConfig, SandboxConfig,
};
use std::collections::HashMap;
use tempfile::TempDir;

fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_config_defaults() {
    let config = Config::default();

    assert_eq!(config.provider.api_base, "https://api.openai.com/v1");
    assert_eq!(config.provider.max_tokens, 16384);
    assert_eq!(config.provider.timeout_secs, 120);
    assert!(config.provider.api_key.is_empty());

    assert!(config.retry.enabled);
    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.retry.initial_delay_ms, 1000);
    assert_eq!(config.retry.max_delay_ms, 10_000);
    assert_eq!(config.retry.exponential_base, 2.0);

    assert_eq!(config.agent.workspace, "~/.skipper/workspace");
    assert_eq!(config.agent.max_steps, 50);
    assert_eq!(config.agent.max_concurrent_tools, 4);
    assert!(config.agent.enable_sandbox);
    assert!(config.agent.enable_memory);

    assert_eq!(config.sandbox.max_file_bytes, 10 * 1024 * 1024);
    assert!(config.sandbox.allowed_paths.is_empty());
    assert!(config.sandbox.allowed_commands.is_empty());
    assert!(config.sandbox.forbidden_commands.contains(&"rm".to_string()));
    assert!(config.sandbox.forbidden_commands.contains(&"sudo".to_string()));
}

#[test]
fn test_empty_document_uses_defaults() {
    let config: Config = serde_json::from_str("{}").unwrap();
    assert_eq!(config.agent.max_steps, 50);
    assert_eq!(config.sandbox.forbidden_commands, default_forbidden_commands());
}

#[test]
fn test_partial_sections_fill_defaults() {
    let json = r#"{
        "provider": { "api_key": "sk-test" },
        "sandbox": { "forbidden_commands": ["curl"], "allowed_paths": ["/srv/data"] }
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.provider.api_key, "sk-test");
    assert_eq!(config.provider.model, ProviderConfig::default().model);
    assert_eq!(config.sandbox.forbidden_commands, vec!["curl".to_string()]);
    assert_eq!(config.sandbox.allowed_paths, vec!["/srv/data".to_string()]);
    assert_eq!(config.sandbox.max_file_bytes, SandboxConfig::default().max_file_bytes);
}

#[tokio::test]
async fn test_save_and_load_roundtrip() {
    let dir = temp_dir();
    let path = dir.path().join("nested").join("config.json");

    let mut config = Config::default();
    config.provider.api_key = "sk-roundtrip".to_string();
    config.agent.max_steps = 7;
    config.sandbox.allowed_commands = vec!["ls".to_string(), "cat".to_string()];

    config.save_to(&path).await.unwrap();
    assert!(path.exists());

    let loaded = Config::load_from(&path).await.unwrap();
    assert_eq!(loaded.provider.api_key, "sk-roundtrip");
    assert_eq!(loaded.agent.max_steps, 7);
    assert_eq!(loaded.sandbox.allowed_commands.len(), 2);
}

#[tokio::test]
async fn test_load_missing_file_returns_defaults() {
    let dir = temp_dir();
    let config = Config::load_from(&dir.path().join("absent.json"))
        .await
        .unwrap();
    assert_eq!(config.agent.max_steps, AgentConfig::default().max_steps);
}

#[tokio::test]
async fn test_load_malformed_file_is_error() {
    let dir = temp_dir();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    let result = Config::load_from(&path).await;
    assert!(matches!(result, Err(skipper_config::ConfigError::Json(_))));
}

#[test]
fn test_env_overrides() {
    let mut config = Config::default();
    config
        .apply_env_overrides(env_of(&[
            ("SKIPPER_API_KEY", "sk-env"),
            ("SKIPPER_MODEL", "glm-4"),
            ("SKIPPER_WORKSPACE", "/tmp/ws"),
            ("SKIPPER_MAX_STEPS", "12"),
        ]))
        .unwrap();

    assert_eq!(config.provider.api_key, "sk-env");
    assert_eq!(config.provider.model, "glm-4");
    assert_eq!(config.agent.workspace, "/tmp/ws");
    assert_eq!(config.agent.max_steps, 12);
}

#[test]
fn test_env_override_rejects_bad_number() {
    let mut config = Config::default();
    let result = config.apply_env_overrides(env_of(&[("SKIPPER_MAX_STEPS", "many")]));
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("SKIPPER_MAX_STEPS"));
}

#[test]
fn test_validate_reports_missing_key() {
    let config = Config::default();
    let errors = config.validate();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("API key"));
}

#[test]
fn test_validate_reports_bad_limits() {
    let mut config = Config::default();
    config.provider.api_key = "sk".to_string();
    config.agent.max_steps = 0;
    config.agent.max_concurrent_tools = 0;
    config.agent.command_timeout_secs = 900;
    config.retry = RetryConfig {
        exponential_base: 0.5,
        ..RetryConfig::default()
    };

    let errors = config.validate();
    assert_eq!(errors.len(), 4);
}

#[test]
fn test_validate_ok() {
    let mut config = Config::default();
    config.provider.api_key = "sk".to_string();
    assert!(config.validate().is_empty());
}

#[test]
fn test_workspace_path_expands_tilde() {
    let mut config = Config::default();
    config.agent.workspace = "~/projects/demo".to_string();
    let home = dirs::home_dir().expect("home dir");
    assert_eq!(config.workspace_path(), home.join("projects/demo"));

    config.agent.workspace = "/abs/ws".to_string();
    assert_eq!(config.workspace_path(), std::path::PathBuf::from("/abs/ws"));
}

#[test]
fn test_api_key_whitespace_is_missing() {
    let mut config = Config::default();
    config.provider.api_key = "   ".to_string();
    assert!(!config.has_api_key());
}
