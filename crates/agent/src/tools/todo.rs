//! `todo` tool over the shared TodoManager

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::{ToolClass, ToolContext, ToolError, ToolTrait};
use crate::todo::{SharedTodos, TodoManager, TodoState};

pub struct TodoTool {
    todos: SharedTodos,
}

impl TodoTool {
    pub fn new(todos: SharedTodos) -> Self {
        Self { todos }
    }

    /// Tool over a fresh in-memory list
    pub fn detached() -> Self {
        Self::new(std::sync::Arc::new(tokio::sync::Mutex::new(TodoManager::new())))
    }

    pub fn todos(&self) -> &SharedTodos {
        &self.todos
    }
}

#[derive(Deserialize)]
struct TodoArgs {
    action: String,
    description: Option<String>,
    id: Option<String>,
    state: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str, action: &str) -> Result<&'a str, ToolError> {
    value
        .as_deref()
        .ok_or_else(|| ToolError::Validation(format!("'{}' requires '{}'", action, name)))
}

/// Save the list; on failure the returned note is appended to the tool output
async fn persist(todos: &TodoManager) -> String {
    match todos.save().await {
        Ok(()) => String::new(),
        Err(e) => {
            warn!("failed to save todos: {}", e);
            format!("\n\n(not saved: {})", e)
        }
    }
}

#[async_trait]
impl ToolTrait for TodoTool {
    fn name(&self) -> &str {
        "todo"
    }
    fn description(&self) -> &str {
        "Track work items. Actions: add (description), set_state (id, state), list. Only one item may be in_progress at a time; complete it before starting another."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["add", "set_state", "list"] },
                "description": { "type": "string", "description": "Item text, for add" },
                "id": { "type": "string", "description": "Item id, for set_state" },
                "state": {
                    "type": "string",
                    "enum": ["pending", "in_progress", "completed"],
                    "description": "New state, for set_state"
                }
            },
            "required": ["action"]
        })
    }
    fn class(&self) -> ToolClass {
        ToolClass::Todo
    }
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        let args: TodoArgs = serde_json::from_value(args)?;
        // held across the whole call: one mutation at a time
        let mut todos = self.todos.lock().await;

        match args.action.as_str() {
            "add" => {
                let description = required(&args.description, "description", "add")?;
                let item = todos.add(description)?;
                let note = persist(&todos).await;
                Ok(format!("Added {}\n\n{}{}", item, todos.render(), note))
            }
            "set_state" => {
                let id = required(&args.id, "id", "set_state")?;
                let state: TodoState = required(&args.state, "state", "set_state")?
                    .parse()
                    .map_err(ToolError::Validation)?;
                let item = todos.set_state(id, state)?;
                let note = persist(&todos).await;
                Ok(format!("Updated {}\n\n{}{}", item, todos.render(), note))
            }
            "list" => Ok(todos.render()),
            other => Err(ToolError::Validation(format!("unknown action '{}'", other))),
        }
    }
}
