//! `delegate` tool: hands a task to a sub-agent

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use skipper_provider::Provider;

use super::{ToolClass, ToolContext, ToolError, ToolTrait};
use crate::subagent::{SubAgentManager, SubAgentStatus};

pub struct DelegateTool<P: Provider + 'static> {
    manager: Arc<SubAgentManager<P>>,
    description: String,
}

impl<P: Provider + 'static> DelegateTool<P> {
    /// The tool description lists the profiles registered at this point
    pub fn new(manager: Arc<SubAgentManager<P>>) -> Self {
        let mut description = String::from(
            "Delegate a self-contained task to a specialized sub-agent and get its final report.",
        );
        let profiles = manager.list();
        if !profiles.is_empty() {
            description.push_str(" Agents:");
            for p in &profiles {
                description.push_str(&format!(" {} ({});", p.name, p.description));
            }
        }
        Self {
            manager,
            description,
        }
    }

    pub fn manager(&self) -> &Arc<SubAgentManager<P>> {
        &self.manager
    }
}

#[derive(Deserialize)]
struct DelegateArgs {
    agent: String,
    task: String,
}

#[async_trait]
impl<P: Provider + 'static> ToolTrait for DelegateTool<P> {
    fn name(&self) -> &str {
        "delegate"
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent": { "type": "string", "description": "Sub-agent profile name" },
                "task": { "type": "string", "description": "Complete description of the task" }
            },
            "required": ["agent", "task"]
        })
    }
    fn class(&self) -> ToolClass {
        ToolClass::Delegation
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: DelegateArgs = serde_json::from_value(args)?;
        if args.task.trim().is_empty() {
            return Err(ToolError::Validation("task must not be empty".to_string()));
        }

        let task = self
            .manager
            .execute(&args.agent, &args.task, &ctx.cancel)
            .await
            .map_err(|e| ToolError::SubAgent(e.to_string()))?;

        let report = task.result.unwrap_or_default();
        match task.status {
            SubAgentStatus::Completed => Ok(format!(
                "[{} agent, {} steps]\n{}",
                task.profile_name, task.steps, report
            )),
            SubAgentStatus::Failed | SubAgentStatus::Running => Err(ToolError::SubAgent(format!(
                "{} agent: {}",
                task.profile_name, report
            ))),
        }
    }
}
