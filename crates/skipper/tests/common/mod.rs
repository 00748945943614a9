//! Common test utilities for skipper integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

const OVERRIDES: &[&str] = &[
    "SKIPPER_API_KEY",
    "SKIPPER_API_BASE",
    "SKIPPER_MODEL",
    "SKIPPER_WORKSPACE",
    "SKIPPER_MAX_STEPS",
    "RUST_LOG",
];

/// Isolated HOME with its own config and workspace
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub workspace_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let config_dir = temp_dir.path().join(".skipper");
        let workspace_dir = temp_dir.path().join("project");
        std::fs::create_dir_all(&workspace_dir)?;

        Ok(Self {
            temp_dir,
            config_dir,
            workspace_dir,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    pub fn workspace_file(&self, name: &str) -> PathBuf {
        self.workspace_dir.join(name)
    }

    /// Command with HOME pointed at the temp dir and no inherited overrides
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_skipper"));
        cmd.env("HOME", self.temp_dir.path());
        for key in OVERRIDES {
            cmd.env_remove(key);
        }
        cmd
    }

    /// Write a config pointing at `api_base` with this env's workspace
    pub fn write_config(&self, api_base: &str) -> anyhow::Result<()> {
        let config = serde_json::json!({
            "provider": {
                "api_key": "sk-test",
                "api_base": api_base,
                "model": "test-model",
                "timeout_secs": 5
            },
            "retry": { "max_retries": 0 },
            "agent": { "workspace": self.workspace_dir.to_string_lossy() }
        });
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::write(self.config_file(), serde_json::to_string_pretty(&config)?)?;
        Ok(())
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
