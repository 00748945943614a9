//! Agent loop - the step engine
//!
//! Each step sends the conversation and the tool schemas to the model. A
//! text-only answer ends the run; a batch of tool calls is dispatched and
//! committed as one turn, then the next step begins.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skipper_config::{paths, Config};
use skipper_memory::{RepositoryMemory, DEFAULT_CONTEXT_ITEMS};
use skipper_provider::{ChatParams, ChatResponse, Provider, ProviderError, ToolChoice};

use crate::context::ContextBuilder;
use crate::conversation::ConversationState;
use crate::retry::RetryPolicy;
use crate::sandbox::{Sandbox, SandboxPolicy};
use crate::subagent::SubAgentManager;
use crate::todo::{SharedTodos, TodoItem, TodoManager};
use crate::tools::{self, DelegateTool, SharedMemory, ToolRegistry};
use crate::{AgentError, Result, RunOutcome, StopReason};

/// Multi-turn, tool-using agent over one conversation
pub struct AgentLoop<P: Provider + 'static> {
    provider: Arc<P>,
    tools: Arc<ToolRegistry>,
    todos: SharedTodos,
    memory: Option<SharedMemory>,
    conversation: ConversationState,
    system_prompt: Option<String>,
    retry: RetryPolicy,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_steps: usize,
}

/// Builder for [`AgentLoop`]
pub struct AgentLoopBuilder<P: Provider + 'static> {
    provider: Arc<P>,
    tools: Option<ToolRegistry>,
    todos: Option<SharedTodos>,
    memory: Option<SharedMemory>,
    system_prompt: Option<String>,
    retry: RetryPolicy,
    model: Option<String>,
    max_tokens: u32,
    temperature: f32,
    max_steps: usize,
}

impl<P: Provider + 'static> AgentLoopBuilder<P> {
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn todos(mut self, todos: SharedTodos) -> Self {
        self.todos = Some(todos);
        self
    }

    pub fn memory(mut self, memory: SharedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into()).filter(|m| !m.is_empty());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Default budget for [`AgentLoop::run_default`]
    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn build(self) -> AgentLoop<P> {
        let model = self.model.unwrap_or_else(|| self.provider.default_model());
        let tools = self
            .tools
            .unwrap_or_else(|| ToolRegistry::new(std::env::current_dir().unwrap_or_default()));
        let conversation = match &self.system_prompt {
            Some(prompt) => ConversationState::with_system(prompt.clone()),
            None => ConversationState::new(),
        };

        AgentLoop {
            provider: self.provider,
            tools: Arc::new(tools),
            todos: self
                .todos
                .unwrap_or_else(|| Arc::new(Mutex::new(TodoManager::new()))),
            memory: self.memory,
            conversation,
            system_prompt: self.system_prompt,
            retry: self.retry,
            model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            max_steps: self.max_steps,
        }
    }
}

fn fatal(e: ProviderError) -> AgentError {
    match e {
        ProviderError::InvalidResponse(msg) => AgentError::InvalidResponse(msg),
        other => AgentError::Provider(other),
    }
}

impl<P: Provider + 'static> AgentLoop<P> {
    pub fn builder(provider: Arc<P>) -> AgentLoopBuilder<P> {
        AgentLoopBuilder {
            provider,
            tools: None,
            todos: None,
            memory: None,
            system_prompt: None,
            retry: RetryPolicy::default(),
            model: None,
            max_tokens: 4096,
            temperature: 0.7,
            max_steps: 50,
        }
    }

    /// Fully wired loop: sandboxed built-in tools, persisted todos and
    /// memory, sub-agent delegation and the assembled system prompt.
    pub async fn from_config(provider: Arc<P>, config: &Config) -> Result<Self> {
        let workspace = config.workspace_path();
        paths::ensure_dir(&workspace).await?;
        let agent = &config.agent;

        let mut registry = ToolRegistry::new(&workspace)
            .with_max_concurrency(agent.max_concurrent_tools);
        if agent.enable_sandbox {
            let policy = SandboxPolicy::from_config(&config.sandbox, &workspace);
            registry = registry.with_sandbox(Sandbox::new(policy));
        } else {
            warn!("sandbox disabled; file and command tools are unrestricted");
        }

        let todos: SharedTodos = Arc::new(Mutex::new(
            TodoManager::load(paths::todo_file(&workspace)).await,
        ));
        let memory: Option<SharedMemory> = if agent.enable_memory {
            let store = RepositoryMemory::load(paths::memory_file(&workspace)).await;
            Some(Arc::new(Mutex::new(store)))
        } else {
            None
        };

        tools::register_default_tools(&mut registry, agent, Arc::clone(&todos), memory.clone())?;

        let retry = RetryPolicy::from(&config.retry);
        let sampling = &config.provider;
        let subagents = SubAgentManager::new(Arc::clone(&provider), registry.clone())
            .with_retry(retry.clone())
            .with_model(sampling.model.clone(), sampling.max_tokens, sampling.temperature);
        let profiles = subagents.register_predefined();
        debug!(profiles, "registered sub-agent profiles");
        registry.register(DelegateTool::new(Arc::new(subagents)))?;

        let mut context = ContextBuilder::new(&workspace).with_tools(registry.describe());
        if let Some(memory) = &memory {
            context = context.with_memory(memory.lock().await.context_prompt(DEFAULT_CONTEXT_ITEMS));
        }
        let prompt = context.build_system_prompt().await;

        let mut builder = Self::builder(provider)
            .tools(registry)
            .todos(todos)
            .system_prompt(prompt)
            .retry(retry)
            .model(sampling.model.clone())
            .max_tokens(sampling.max_tokens)
            .temperature(sampling.temperature)
            .max_steps(agent.max_steps);
        if let Some(memory) = memory {
            builder = builder.memory(memory);
        }
        Ok(builder.build())
    }

    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.conversation.push_user(text);
    }

    /// Run with the configured step budget
    pub async fn run_default(&mut self, cancel: &CancellationToken) -> Result<RunOutcome> {
        self.run(self.max_steps, cancel).await
    }

    /// Drive steps until a text-only answer, `max_steps` model calls, or
    /// cancellation. Fatal errors leave the conversation at its last
    /// complete turn. Changed repository memory is saved before returning.
    pub async fn run(&mut self, max_steps: usize, cancel: &CancellationToken) -> Result<RunOutcome> {
        let outcome = self.run_steps(max_steps, cancel).await;
        self.flush_memory().await;
        outcome
    }

    /// Write back repository memory changed during the run
    async fn flush_memory(&self) {
        let Some(memory) = &self.memory else {
            return;
        };
        match memory.lock().await.flush().await {
            Ok(true) => debug!("repository memory saved"),
            Ok(false) => {}
            Err(e) => warn!("failed to save repository memory: {}", e),
        }
    }

    async fn run_steps(
        &mut self,
        max_steps: usize,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let mut steps = 0;
        loop {
            if steps >= max_steps {
                info!(steps, "step limit reached");
                return Ok(self.outcome(StopReason::StepLimit, steps));
            }
            if cancel.is_cancelled() {
                info!(steps, "run cancelled");
                return Ok(self.outcome(StopReason::Cancelled, steps));
            }
            steps += 1;
            debug!(step = steps, messages = self.conversation.len(), "calling model");

            let Some(response) = self.complete_with_retry(cancel).await? else {
                info!(steps, "run cancelled during model call");
                return Ok(self.outcome(StopReason::Cancelled, steps));
            };
            response.validate().map_err(fatal)?;

            if !response.has_tool_calls() {
                let text = response.content.unwrap_or_default();
                self.conversation.push_assistant(text.clone());
                info!(steps, "run finished");
                return Ok(RunOutcome {
                    stop: StopReason::Done,
                    steps,
                    final_text: Some(text),
                });
            }

            let calls = response.tool_calls;
            debug!(step = steps, calls = calls.len(), "dispatching tool calls");
            let results = match self.tools.dispatch_batch(&calls, cancel).await {
                Ok(results) => results,
                Err(_) => {
                    info!(steps, "run cancelled during tool execution");
                    return Ok(self.outcome(StopReason::Cancelled, steps));
                }
            };
            self.conversation.commit_tool_turn(response.content, calls, results);
        }
    }

    /// One model call with bounded backoff on transient failures. `None`
    /// means the token fired first.
    async fn complete_with_retry(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ChatResponse>> {
        let mut attempt = 0u32;
        loop {
            let params = self.params();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                r = self.provider.complete(params) => r,
            };

            match result {
                Ok(response) => return Ok(Some(response)),
                Err(e) if e.is_transient() => {
                    if attempt >= self.retry.max_retries {
                        warn!(attempts = attempt + 1, error = %e, "model service retries exhausted");
                        return Err(AgentError::ServiceUnavailable {
                            attempts: attempt + 1,
                            last: e.to_string(),
                        });
                    }
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient model service error, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(fatal(e)),
            }
        }
    }

    fn params(&self) -> ChatParams {
        ChatParams {
            model: self.model.clone(),
            messages: self.conversation.messages().to_vec(),
            tools: self.tools.definitions(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tool_choice: ToolChoice::Auto,
        }
    }

    fn outcome(&self, stop: StopReason, steps: usize) -> RunOutcome {
        RunOutcome {
            stop,
            steps,
            final_text: self.conversation.last_assistant_text().map(str::to_string),
        }
    }

    /// Snapshot of the TODO list
    pub async fn list_todos(&self) -> Vec<TodoItem> {
        self.todos.lock().await.list()
    }

    pub fn todos(&self) -> &SharedTodos {
        &self.todos
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn memory(&self) -> Option<&SharedMemory> {
        self.memory.as_ref()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn workspace(&self) -> PathBuf {
        self.tools.workspace().to_path_buf()
    }

    /// Drop everything but the system turn
    pub fn reset(&mut self) {
        self.conversation = match &self.system_prompt {
            Some(prompt) => ConversationState::with_system(prompt.clone()),
            None => ConversationState::new(),
        };
    }
}
