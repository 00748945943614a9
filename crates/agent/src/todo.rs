//! TODO tracking with a single in-progress item

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// TodoManager shared between the loop and the `todo` tool. The mutex makes
/// every mutation a single writer.
pub type SharedTodos = Arc<Mutex<TodoManager>>;

#[derive(Error, Debug)]
pub enum TodoError {
    #[error("no todo with id '{0}'")]
    NotFound(String),

    #[error("cannot start '{requested}': '{active}' is already in progress")]
    Conflict { requested: String, active: String },

    #[error("todo '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: TodoState,
        to: TodoState,
    },

    #[error("todo description must not be empty")]
    EmptyDescription,

    #[error("todo I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("todo serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoState {
    Pending,
    InProgress,
    Completed,
}

impl TodoState {
    /// Whether `self -> next` is a legal move. Same-state is a no-op.
    pub fn can_become(self, next: TodoState) -> bool {
        use TodoState::*;
        matches!(
            (self, next),
            (Pending, InProgress) | (Pending, Completed) | (InProgress, Completed)
        ) || self == next
    }

    fn marker(self) -> &'static str {
        match self {
            TodoState::Pending => "[ ]",
            TodoState::InProgress => "[>]",
            TodoState::Completed => "[x]",
        }
    }
}

impl fmt::Display for TodoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TodoState::Pending => "pending",
            TodoState::InProgress => "in_progress",
            TodoState::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TodoState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(TodoState::Pending),
            "in_progress" => Ok(TodoState::InProgress),
            "completed" => Ok(TodoState::Completed),
            other => Err(format!("unknown todo state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub description: String,
    pub state: TodoState,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

impl fmt::Display for TodoItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}. {}", self.state.marker(), self.id, self.description)
    }
}

#[derive(Serialize, Deserialize)]
struct TodoFile {
    todos: Vec<TodoItem>,
    updated_at: DateTime<Local>,
}

/// Ordered TODO list, optionally persisted to a JSON file
#[derive(Debug, Default)]
pub struct TodoManager {
    items: Vec<TodoItem>,
    next_id: u64,
    path: Option<PathBuf>,
}

impl TodoManager {
    /// In-memory list
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`, keeping it as the save target. A missing file gives
    /// an empty list; a corrupt one is logged and replaced on next save.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut manager = Self {
            path: Some(path.clone()),
            ..Self::default()
        };
        if !path.exists() {
            return manager;
        }

        let file = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<TodoFile>(&content).map_err(TodoError::from),
            Err(e) => Err(TodoError::from(e)),
        };
        match file {
            Ok(file) => {
                manager.items = file.todos;
                manager.repair();
                debug!("loaded {} todos from {:?}", manager.items.len(), path);
            }
            Err(e) => warn!("ignoring unreadable todo file {:?}: {}", path, e),
        }
        manager
    }

    /// Restore invariants after loading: one in-progress item at most, and
    /// fresh ids continue after the largest numeric one.
    fn repair(&mut self) {
        let mut seen_active = false;
        for item in &mut self.items {
            if item.state == TodoState::InProgress {
                if seen_active {
                    warn!("todo '{}' was also in progress; reset to pending", item.id);
                    item.state = TodoState::Pending;
                } else {
                    seen_active = true;
                }
            }
        }
        self.next_id = self
            .items
            .iter()
            .filter_map(|i| i.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
    }

    pub async fn save(&self) -> Result<(), TodoError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = TodoFile {
            todos: self.items.clone(),
            updated_at: Local::now(),
        };
        tokio::fs::write(path, serde_json::to_string_pretty(&file)?).await?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn add(&mut self, description: &str) -> Result<TodoItem, TodoError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(TodoError::EmptyDescription);
        }
        self.next_id += 1;
        let now = Local::now();
        let item = TodoItem {
            id: self.next_id.to_string(),
            description: description.to_string(),
            state: TodoState::Pending,
            created_at: now,
            updated_at: now,
        };
        self.items.push(item.clone());
        Ok(item)
    }

    pub fn set_state(&mut self, id: &str, state: TodoState) -> Result<TodoItem, TodoError> {
        let idx = self
            .items
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| TodoError::NotFound(id.to_string()))?;

        let current = self.items[idx].state;
        if !current.can_become(state) {
            return Err(TodoError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to: state,
            });
        }

        if state == TodoState::InProgress {
            if let Some(active) = self
                .items
                .iter()
                .find(|i| i.state == TodoState::InProgress && i.id != id)
            {
                return Err(TodoError::Conflict {
                    requested: id.to_string(),
                    active: active.id.clone(),
                });
            }
        }

        let item = &mut self.items[idx];
        if item.state != state {
            item.state = state;
            item.updated_at = Local::now();
        }
        Ok(item.clone())
    }

    pub fn get(&self, id: &str) -> Option<&TodoItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn in_progress(&self) -> Option<&TodoItem> {
        self.items.iter().find(|i| i.state == TodoState::InProgress)
    }

    /// Snapshot in insertion order
    pub fn list(&self) -> Vec<TodoItem> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// One line per item, or a placeholder when empty
    pub fn render(&self) -> String {
        render_items(&self.items)
    }
}

pub fn render_items(items: &[TodoItem]) -> String {
    if items.is_empty() {
        return "No todos".to_string();
    }
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
