//! Sub-agent profiles and delegated runs
//!
//! A sub-agent is a fresh [`AgentLoop`] over a reduced tool set. Profiles
//! can never include a delegation tool, so nesting stops at one level.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use skipper_provider::Provider;

use crate::loop_agent::AgentLoop;
use crate::retry::RetryPolicy;
use crate::tools::{TodoTool, ToolRegistry};
use crate::{AgentError, Result, RunOutcome, StopReason};

/// A specialized agent: prompt, tool subset and step budget
#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub name: String,
    pub description: String,
    /// System prompt; `{task}` is replaced by the delegated task
    pub prompt_template: String,
    pub tools: Vec<String>,
    pub max_steps: usize,
}

const WRITE_TOOLS: &[&str] = &["read_file", "write_file", "edit_file", "list_dir", "exec"];
const READ_TOOLS: &[&str] = &["read_file", "list_dir"];

impl AgentProfile {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        prompt_template: impl Into<String>,
        tools: &[&str],
        max_steps: usize,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prompt_template: prompt_template.into(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            max_steps,
        }
    }

    pub fn code() -> Self {
        Self::new(
            "code",
            "Writes, analyzes and debugs code",
            "# Code Assistant\n\nYou are a focused code assistant. Read the relevant code first, \
             make the smallest change that solves the task, and check it builds or runs. \
             Finish with a short summary of what you changed.",
            WRITE_TOOLS,
            30,
        )
    }

    pub fn research() -> Self {
        Self::new(
            "research",
            "Explores the codebase and documentation and reports findings",
            "# Research Assistant\n\nYou explore the repository to answer a question. \
             You cannot modify files. Cite the files you relied on and finish with a concise answer.",
            READ_TOOLS,
            20,
        )
    }

    pub fn testing() -> Self {
        Self::new(
            "testing",
            "Writes and runs tests and diagnoses failures",
            "# Testing Assistant\n\nYou write and run tests. Cover edge cases, run the suite, \
             and report which tests pass or fail and why.",
            WRITE_TOOLS,
            25,
        )
    }

    pub fn predefined() -> Vec<Self> {
        vec![Self::code(), Self::research(), Self::testing()]
    }

    pub fn render_prompt(&self, task: &str) -> String {
        if self.prompt_template.contains("{task}") {
            self.prompt_template.replace("{task}", task)
        } else {
            self.prompt_template.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAgentStatus {
    Running,
    Completed,
    Failed,
}

/// Record of one delegation
#[derive(Debug, Clone)]
pub struct SubAgentTask {
    pub id: String,
    pub profile_name: String,
    pub description: String,
    pub status: SubAgentStatus,
    pub result: Option<String>,
    pub steps: usize,
}

impl SubAgentTask {
    fn start(profile_name: &str, description: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            profile_name: profile_name.to_string(),
            description: description.to_string(),
            status: SubAgentStatus::Running,
            result: None,
            steps: 0,
        }
    }

    fn finish(&mut self, outcome: Result<RunOutcome>) {
        match outcome {
            Ok(run) => {
                self.steps = run.steps;
                match run.stop {
                    StopReason::Done => {
                        self.status = SubAgentStatus::Completed;
                        self.result = run.final_text;
                    }
                    StopReason::StepLimit => {
                        self.status = SubAgentStatus::Completed;
                        let partial = run.final_text.unwrap_or_else(|| "(no summary)".to_string());
                        self.result = Some(format!(
                            "{}\n\n(stopped after {} steps without a final answer)",
                            partial, run.steps
                        ));
                    }
                    StopReason::Cancelled => {
                        self.status = SubAgentStatus::Failed;
                        self.result = Some("cancelled".to_string());
                    }
                }
            }
            Err(e) => {
                self.status = SubAgentStatus::Failed;
                self.result = Some(e.to_string());
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SubAgentStatus::Completed
    }
}

/// Sub-agent registry and runner
pub struct SubAgentManager<P: Provider + 'static> {
    provider: Arc<P>,
    tools: ToolRegistry,
    profiles: Mutex<HashMap<String, AgentProfile>>,
    running: Mutex<HashMap<String, SubAgentTask>>,
    retry: RetryPolicy,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<P: Provider + 'static> SubAgentManager<P> {
    /// Manager whose children draw tools from `tools`
    pub fn new(provider: Arc<P>, tools: ToolRegistry) -> Self {
        let model = provider.default_model();
        Self {
            provider,
            tools,
            profiles: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            retry: RetryPolicy::default(),
            model,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        let model = model.into();
        if !model.is_empty() {
            self.model = model;
        }
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    /// Add or replace a profile. Its tools must exist and must not delegate.
    pub fn register(&self, profile: AgentProfile) -> Result<()> {
        if profile.name.trim().is_empty() {
            return Err(AgentError::SubAgent("profile name must not be empty".to_string()));
        }
        if profile.max_steps == 0 {
            return Err(AgentError::SubAgent(format!(
                "profile '{}' needs a positive step budget",
                profile.name
            )));
        }
        self.tools.subset(&profile.tools)?;

        let mut profiles = locked(&self.profiles);
        if profiles.contains_key(&profile.name) {
            warn!(profile = %profile.name, "replacing sub-agent profile");
        }
        profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    /// Register the predefined profiles the tool set supports
    pub fn register_predefined(&self) -> usize {
        AgentProfile::predefined()
            .into_iter()
            .filter(|p| match self.register(p.clone()) {
                Ok(()) => true,
                Err(e) => {
                    debug!(profile = %p.name, "skipping predefined profile: {}", e);
                    false
                }
            })
            .count()
    }

    pub fn unregister(&self, name: &str) -> bool {
        locked(&self.profiles).remove(name).is_some()
    }

    pub fn profile(&self, name: &str) -> Option<AgentProfile> {
        locked(&self.profiles).get(name).cloned()
    }

    /// Profiles sorted by name
    pub fn list(&self) -> Vec<AgentProfile> {
        let mut profiles: Vec<AgentProfile> = locked(&self.profiles).values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        profiles
    }

    pub fn running_count(&self) -> usize {
        locked(&self.running).len()
    }

    pub fn running(&self) -> Vec<SubAgentTask> {
        locked(&self.running).values().cloned().collect()
    }

    /// Run `task` under the named profile. An unknown profile is an error;
    /// anything that goes wrong inside the child is reported as a failed
    /// task instead.
    pub async fn execute(
        &self,
        profile_name: &str,
        task: &str,
        cancel: &CancellationToken,
    ) -> Result<SubAgentTask> {
        let profile = self.profile(profile_name).ok_or_else(|| {
            AgentError::SubAgent(format!("unknown agent profile '{}'", profile_name))
        })?;

        let mut record = SubAgentTask::start(&profile.name, task);
        locked(&self.running).insert(record.id.clone(), record.clone());
        info!(task_id = %record.id, profile = %profile.name, "starting sub-agent");

        let outcome = self.run_child(&profile, task, cancel).await;
        locked(&self.running).remove(&record.id);
        record.finish(outcome);

        info!(
            task_id = %record.id,
            profile = %profile.name,
            status = ?record.status,
            steps = record.steps,
            "sub-agent finished"
        );
        Ok(record)
    }

    async fn run_child(
        &self,
        profile: &AgentProfile,
        task: &str,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let mut tools = self.tools.subset(&profile.tools)?;
        if tools.unregister("todo") {
            tools.register(TodoTool::detached())?;
        }

        let prompt = format!(
            "{}\n\n## Workspace\n{}",
            profile.render_prompt(task),
            tools.workspace().display()
        );
        let mut child = AgentLoop::builder(Arc::clone(&self.provider))
            .tools(tools)
            .system_prompt(prompt)
            .retry(self.retry.clone())
            .model(self.model.clone())
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .max_steps(profile.max_steps)
            .build();
        child.add_user_message(task);
        child.run(profile.max_steps, &cancel.child_token()).await
    }
}
