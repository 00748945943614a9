//! System prompt assembly

use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Workspace file whose content is appended to the system prompt
pub const BOOTSTRAP_FILE: &str = "SKIPPER.md";

const DEFAULT_IDENTITY: &str = "You are skipper, a coding agent working inside a local repository. \
You can read, write and edit files, run shell commands, track your work as todos \
and delegate focused tasks to sub-agents.

Work step by step. Keep exactly one todo in progress and complete it before starting the next. \
When the task is finished, reply with a short summary and no tool calls.";

/// Builds the initial system turn
pub struct ContextBuilder {
    workspace: PathBuf,
    identity: String,
    memory_context: Option<String>,
    tools: Vec<(String, String)>,
}

impl ContextBuilder {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
            identity: DEFAULT_IDENTITY.to_string(),
            memory_context: None,
            tools: Vec::new(),
        }
    }

    /// Replace the identity paragraph
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Rendered repository memory; ignored when blank
    pub fn with_memory(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.memory_context = (!context.trim().is_empty()).then_some(context);
        self
    }

    /// `(name, description)` pairs
    pub fn with_tools(mut self, mut tools: Vec<(String, String)>) -> Self {
        tools.sort();
        self.tools = tools;
        self
    }

    pub async fn build_system_prompt(&self) -> String {
        let mut parts = vec![self.header()];

        if let Some(bootstrap) = self.load_bootstrap().await {
            parts.push(format!("## {}\n\n{}", BOOTSTRAP_FILE, bootstrap.trim_end()));
        }

        if let Some(memory) = &self.memory_context {
            parts.push(memory.trim_end().to_string());
        }

        if !self.tools.is_empty() {
            let lines: Vec<String> = self
                .tools
                .iter()
                .map(|(name, desc)| format!("- {}: {}", name, desc))
                .collect();
            parts.push(format!("## Available Tools\n\n{}", lines.join("\n")));
        }

        parts.join("\n\n---\n\n")
    }

    fn header(&self) -> String {
        let now = Local::now().format("%Y-%m-%d %H:%M (%A)");
        format!(
            "# skipper\n\n{}\n\n## Current Time\n{}\n\n## Workspace\n{}",
            self.identity,
            now,
            self.workspace.display()
        )
    }

    async fn load_bootstrap(&self) -> Option<String> {
        let path = self.workspace.join(BOOTSTRAP_FILE);
        if !path.is_file() {
            return None;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if !content.trim().is_empty() => Some(content),
            Ok(_) => None,
            Err(e) => {
                debug!("failed to read {:?}: {}", path, e);
                None
            }
        }
    }
}
