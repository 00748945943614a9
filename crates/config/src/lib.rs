//! Configuration management for skipper
//!
//! Loads the JSON config document, applies environment overrides and
//! exposes the typed sections consumed by the provider, agent and CLI.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;

pub use paths::{config_path, data_dir, expand_tilde, workspace_path};

/// Errors raised while loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Model service connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_api_base(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    120
}

/// Backoff settings for transient model-service failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_base: default_exponential_base(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_exponential_base() -> f64 {
    2.0
}

/// Agent loop defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_true")]
    pub enable_memory: bool,
    #[serde(default = "default_true")]
    pub enable_sandbox: bool,
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_max_command_timeout_secs")]
    pub max_command_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            max_steps: default_max_steps(),
            enable_memory: true,
            enable_sandbox: true,
            max_concurrent_tools: default_max_concurrent_tools(),
            command_timeout_secs: default_command_timeout_secs(),
            max_command_timeout_secs: default_max_command_timeout_secs(),
        }
    }
}

fn default_workspace() -> String {
    "~/.skipper/workspace".to_string()
}

fn default_max_steps() -> usize {
    50
}

fn default_max_concurrent_tools() -> usize {
    4
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_max_command_timeout_secs() -> u64 {
    600
}

/// Raw sandbox rules as written in the config file.
///
/// Paths are resolved and frozen into an immutable policy by the agent
/// crate at run start; this struct is only the serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_forbidden_commands")]
    pub forbidden_commands: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            forbidden_paths: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
            allowed_commands: Vec::new(),
            forbidden_commands: default_forbidden_commands(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

/// Commands denied unless the config names its own forbidden list
pub fn default_forbidden_commands() -> Vec<String> {
    [
        "rm", "rmdir", "del", "delete", "format", "mkfs", "fdisk", "dd", "shutdown", "reboot",
        "halt", "poweroff", "kill", "killall", "su", "sudo", "passwd", "chmod", "chown",
        "iptables", "ufw",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Root configuration document
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub async fn load() -> Result<Self> {
        let path = config_path();
        let mut config = Self::load_from(&path).await?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from specific location
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        debug!("loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save to the default location
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("writing config to {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Apply `SKIPPER_*` overrides. `lookup` abstracts the environment so
    /// tests need not touch process-global state.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("SKIPPER_API_KEY") {
            self.provider.api_key = key;
        }
        if let Some(base) = lookup("SKIPPER_API_BASE") {
            self.provider.api_base = base;
        }
        if let Some(model) = lookup("SKIPPER_MODEL") {
            self.provider.model = model;
        }
        if let Some(workspace) = lookup("SKIPPER_WORKSPACE") {
            self.agent.workspace = workspace;
        }
        if let Some(steps) = lookup("SKIPPER_MAX_STEPS") {
            self.agent.max_steps = steps.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "SKIPPER_MAX_STEPS".to_string(),
                value: steps.clone(),
            })?;
        }
        Ok(())
    }

    /// Resolved workspace directory
    pub fn workspace_path(&self) -> PathBuf {
        expand_tilde(&self.agent.workspace)
    }

    /// API key, if one is configured
    pub fn api_key(&self) -> Option<String> {
        let key = self.provider.api_key.trim();
        if key.is_empty() {
            None
        } else {
            Some(key.to_string())
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }

    /// Human-readable problems that would prevent a run
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.has_api_key() {
            errors.push(
                "model service API key is required (set SKIPPER_API_KEY or provider.api_key)"
                    .to_string(),
            );
        }
        if self.agent.max_steps == 0 {
            errors.push("agent.max_steps must be at least 1".to_string());
        }
        if self.agent.max_concurrent_tools == 0 {
            errors.push("agent.max_concurrent_tools must be at least 1".to_string());
        }
        if self.agent.command_timeout_secs > self.agent.max_command_timeout_secs {
            errors.push(format!(
                "agent.command_timeout_secs ({}) exceeds agent.max_command_timeout_secs ({})",
                self.agent.command_timeout_secs, self.agent.max_command_timeout_secs
            ));
        }
        if self.retry.exponential_base < 1.0 {
            errors.push("retry.exponential_base must be >= 1.0".to_string());
        }

        errors
    }
}

/// Write a default config if none exists and create the workspace
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("config already exists at {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("wrote default config to {:?}", config_path);
    }

    let config = Config::load().await?;
    let workspace = config.workspace_path();
    tokio::fs::create_dir_all(&workspace).await?;
    info!("workspace ready at {:?}", workspace);

    Ok(config)
}
