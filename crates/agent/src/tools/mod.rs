//! Tools and their dispatch
//!
//! Every tool implements [`ToolTrait`]. The [`ToolRegistry`] owns the
//! name-to-tool mapping, checks arguments against each tool's declared
//! schema, runs the sandbox check for file and command tools, and converts
//! every failure into a [`ToolResult`] instead of an error.

pub mod delegate;
pub mod filesystem;
pub mod memory;
pub mod schema;
pub mod shell;
pub mod todo;

pub use delegate::DelegateTool;
pub use filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use memory::{RememberTool, SharedMemory};
pub use shell::ExecTool;
pub use todo::TodoTool;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use skipper_config::AgentConfig;
use skipper_provider::{Tool, ToolCall};

use crate::sandbox::{resolve_path, FileOperation, Sandbox, SandboxViolation};
use crate::todo::{SharedTodos, TodoError};
use crate::{AgentError, Result};

/// Per-call tool failure. Always reported back to the model, never raised
/// out of dispatch.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    Validation(String),

    #[error("sandbox denied: {0}")]
    Sandbox(#[from] SandboxViolation),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),

    #[error("sub-agent failed: {0}")]
    SubAgent(String),
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::Validation(e.to_string())
    }
}

impl From<TodoError> for ToolError {
    fn from(e: TodoError) -> Self {
        match e {
            TodoError::Conflict { .. } => ToolError::Conflict(e.to_string()),
            TodoError::Io(io) => ToolError::Io(io),
            TodoError::NotFound(_)
            | TodoError::InvalidTransition { .. }
            | TodoError::EmptyDescription
            | TodoError::Json(_) => ToolError::Failed(e.to_string()),
        }
    }
}

/// How a tool touches the outside world; decides which sandbox check runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    /// Takes a `path` argument checked by the file sandbox
    File(FileOperation),
    /// Takes a `command` argument checked by the command sandbox
    Command,
    Todo,
    Memory,
    /// Spawns a sub-agent; never offered to sub-agents
    Delegation,
    General,
}

/// What a handler gets besides its arguments
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workspace: PathBuf,
    /// Canonical, already-authorized path for file tools
    pub path: Option<PathBuf>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            path: None,
            cancel: CancellationToken::new(),
        }
    }

    /// The authorized path, or an error for misregistered tools
    pub fn target_path(&self) -> std::result::Result<&Path, ToolError> {
        self.path
            .as_deref()
            .ok_or_else(|| ToolError::Failed("no authorized path for this call".to_string()))
    }
}

/// Tool capability interface
#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    fn class(&self) -> ToolClass {
        ToolClass::General
    }
    async fn execute(&self, args: Value, ctx: &ToolContext)
        -> std::result::Result<String, ToolError>;
}

pub fn to_provider_tool(tool: &dyn ToolTrait) -> Tool {
    Tool::new(tool.name(), tool.description(), tool.parameters())
}

/// Outcome of one tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            content: content.into(),
            error: None,
        }
    }

    pub fn failure(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            call_id: call_id.into(),
            success: false,
            content: format!("Error: {}", error),
            error: Some(error),
        }
    }

    /// Text placed in the tool message
    pub fn message_content(&self) -> String {
        self.content.clone()
    }
}

struct RegisteredTool {
    tool: Arc<dyn ToolTrait>,
    schema: Value,
}

impl Clone for RegisteredTool {
    fn clone(&self) -> Self {
        Self {
            tool: Arc::clone(&self.tool),
            schema: self.schema.clone(),
        }
    }
}

/// Tool registry and dispatcher
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    workspace: PathBuf,
    sandbox: Option<Sandbox>,
    max_concurrent: usize,
}

impl ToolRegistry {
    /// Empty registry without a sandbox. Relative paths resolve against
    /// `workspace`.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            tools: HashMap::new(),
            workspace: workspace.into(),
            sandbox: None,
            max_concurrent: 4,
        }
    }

    pub fn with_sandbox(mut self, sandbox: Sandbox) -> Self {
        self.workspace = sandbox.policy().workspace().to_path_buf();
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn sandbox(&self) -> Option<&Sandbox> {
        self.sandbox.as_ref()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrent
    }

    /// Register a tool after checking its declaration. A tool with the same
    /// name is replaced.
    pub fn register<T: ToolTrait + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn ToolTrait>) -> Result<()> {
        let name = tool.name().to_string();
        let schema = tool.parameters();
        let invalid = |reason: String| AgentError::InvalidToolSchema {
            tool: name.clone(),
            reason,
        };

        if name.trim().is_empty() {
            return Err(invalid("tool name must not be empty".to_string()));
        }
        schema::validate_declaration(&schema).map_err(invalid)?;

        let target = match tool.class() {
            ToolClass::File(_) => Some("path"),
            ToolClass::Command => Some("command"),
            _ => None,
        };
        if let Some(key) = target {
            let declared = schema["properties"][key]["type"] == "string"
                && schema["required"]
                    .as_array()
                    .is_some_and(|r| r.iter().any(|k| k == key));
            if !declared {
                return Err(invalid(format!(
                    "must declare a required string '{}' argument",
                    key
                )));
            }
        }

        if self.tools.contains_key(&name) {
            warn!(tool = %name, "replacing registered tool");
        }
        self.tools.insert(name, RegisteredTool { tool, schema });
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolTrait>> {
        self.tools.get(name).map(|t| Arc::clone(&t.tool))
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas sent to the model, sorted by name
    pub fn definitions(&self) -> Vec<Tool> {
        self.names()
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| to_provider_tool(t.tool.as_ref()))
            .collect()
    }

    /// `(name, description)` pairs, sorted by name
    pub fn describe(&self) -> Vec<(String, String)> {
        self.names()
            .into_iter()
            .filter_map(|n| {
                let desc = self.tools.get(&n)?.tool.description().to_string();
                Some((n, desc))
            })
            .collect()
    }

    /// Registry restricted to `names`, sharing this one's sandbox and
    /// workspace. Unknown and delegation tools are rejected.
    pub fn subset(&self, names: &[String]) -> Result<ToolRegistry> {
        let mut tools = HashMap::new();
        for name in names {
            let entry = self
                .tools
                .get(name)
                .ok_or_else(|| AgentError::SubAgent(format!("unknown tool '{}'", name)))?;
            if entry.tool.class() == ToolClass::Delegation {
                return Err(AgentError::SubAgent(format!(
                    "delegation tool '{}' cannot be given to a sub-agent",
                    name
                )));
            }
            tools.insert(name.clone(), entry.clone());
        }
        Ok(ToolRegistry {
            tools,
            workspace: self.workspace.clone(),
            sandbox: self.sandbox.clone(),
            max_concurrent: self.max_concurrent,
        })
    }

    /// Sandbox check for a call. Returns the canonical path for file tools.
    fn authorize(
        &self,
        class: ToolClass,
        args: &Value,
    ) -> std::result::Result<Option<PathBuf>, SandboxViolation> {
        match class {
            ToolClass::File(op) => {
                let raw = args["path"].as_str().unwrap_or_default();
                match &self.sandbox {
                    Some(sandbox) => sandbox.files.validate_path(raw, op).map(Some),
                    None => resolve_path(raw, &self.workspace).map(Some).map_err(|e| {
                        SandboxViolation::Unresolvable {
                            path: raw.to_string(),
                            reason: e.to_string(),
                        }
                    }),
                }
            }
            ToolClass::Command => {
                if let Some(sandbox) = &self.sandbox {
                    let line = args["command"].as_str().unwrap_or_default();
                    sandbox.commands.validate_command(line)?;
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Run one call. Never fails: every problem becomes a failed result.
    pub async fn dispatch(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        let Some(entry) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "unknown tool requested");
            return ToolResult::failure(&call.id, format!("unknown tool '{}'", call.name));
        };

        if let Err(reason) = schema::validate_args(&entry.schema, &call.arguments) {
            debug!(tool = %call.name, call_id = %call.id, %reason, "argument validation failed");
            return ToolResult::failure(&call.id, ToolError::Validation(reason).to_string());
        }

        let tool = Arc::clone(&entry.tool);
        let path = match self.authorize(tool.class(), &call.arguments) {
            Ok(path) => path,
            Err(violation) => {
                warn!(tool = %call.name, call_id = %call.id, reason = %violation, "sandbox denied call");
                return ToolResult::failure(&call.id, ToolError::Sandbox(violation).to_string());
            }
        };

        let ctx = ToolContext {
            workspace: self.workspace.clone(),
            path,
            cancel: cancel.child_token(),
        };

        debug!(tool = %call.name, call_id = %call.id, "executing tool");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            r = tool.execute(call.arguments.clone(), &ctx) => r,
        };

        match outcome {
            Ok(content) => ToolResult::success(&call.id, content),
            Err(e) => {
                debug!(tool = %call.name, call_id = %call.id, error = %e, "tool failed");
                ToolResult::failure(&call.id, e.to_string())
            }
        }
    }

    /// Run a batch concurrently, at most `max_concurrency` at a time.
    /// Results come back in request order. If `cancel` fires, in-flight
    /// calls are aborted and `ToolError::Cancelled` is returned.
    pub async fn dispatch_batch(
        self: &Arc<Self>,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<ToolResult>, ToolError> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut set = JoinSet::new();

        for (idx, call) in calls.iter().cloned().enumerate() {
            let registry = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => registry.dispatch(&call, &cancel).await,
                    Err(_) => ToolResult::failure(&call.id, "dispatch pool closed"),
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    set.abort_all();
                    while set.join_next().await.is_some() {}
                    return Err(ToolError::Cancelled);
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok((idx, result))) => slots[idx] = Some(result),
                    Some(Err(e)) => warn!("tool task did not finish: {}", e),
                },
            }
        }

        Ok(slots
            .into_iter()
            .zip(calls)
            .map(|(slot, call)| {
                slot.unwrap_or_else(|| ToolResult::failure(&call.id, "tool task panicked"))
            })
            .collect())
    }
}

/// Register the file, command and todo tools, plus `remember` when a
/// memory store is given.
pub fn register_default_tools(
    registry: &mut ToolRegistry,
    config: &AgentConfig,
    todos: SharedTodos,
    memory: Option<SharedMemory>,
) -> Result<()> {
    registry.register(ReadFileTool)?;
    registry.register(WriteFileTool)?;
    registry.register(EditFileTool)?;
    registry.register(ListDirTool)?;
    registry.register(ExecTool::new(
        config.command_timeout_secs,
        config.max_command_timeout_secs,
    ))?;
    registry.register(TodoTool::new(todos))?;
    if let Some(memory) = memory {
        registry.register(RememberTool::new(memory))?;
    }
    Ok(())
}
