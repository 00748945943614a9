//! Agent core
//!
//! Drives a tool-using conversation against a model service: the step loop,
//! the sandbox gating file and command tools, the tool registry and its
//! concurrent dispatch, the TODO state machine and sub-agent delegation.

use thiserror::Error;

pub mod context;
pub mod conversation;
pub mod loop_agent;
pub mod retry;
pub mod sandbox;
pub mod subagent;
pub mod todo;
pub mod tools;

pub use context::ContextBuilder;
pub use conversation::ConversationState;
pub use loop_agent::{AgentLoop, AgentLoopBuilder};
pub use retry::RetryPolicy;
pub use sandbox::{
    CommandSandbox, FileOperation, FileSandbox, Sandbox, SandboxPolicy, SandboxViolation,
};
pub use subagent::{AgentProfile, SubAgentManager, SubAgentStatus, SubAgentTask};
pub use todo::{SharedTodos, TodoError, TodoItem, TodoManager, TodoState};
pub use tools::{ToolClass, ToolContext, ToolError, ToolRegistry, ToolResult, ToolTrait};

/// Agent errors
///
/// Failures of a single tool call (bad arguments, sandbox denials, TODO
/// conflicts) are [`ToolError`]s and reach the model as failed tool results.
/// `SubAgent` covers delegation setup; the remaining variants end a run.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("model service unavailable after {attempts} attempts: {last}")]
    ServiceUnavailable { attempts: u32, last: String },

    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    #[error("model service error: {0}")]
    Provider(skipper_provider::ProviderError),

    #[error("sub-agent failed: {0}")]
    SubAgent(String),

    #[error("invalid tool schema for '{tool}': {reason}")]
    InvalidToolSchema { tool: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered with text only
    Done,
    /// `max_steps` model calls were made without a text-only answer
    StepLimit,
    /// The cancellation token fired
    Cancelled,
}

/// Result of a non-fatal run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stop: StopReason,
    pub steps: usize,
    pub final_text: Option<String>,
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        self.stop == StopReason::Done
    }
}
