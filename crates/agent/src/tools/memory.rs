//! `remember` tool over the repository memory

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use skipper_memory::RepositoryMemory;

use super::{ToolClass, ToolContext, ToolError, ToolTrait};

pub type SharedMemory = Arc<Mutex<RepositoryMemory>>;

pub struct RememberTool {
    memory: SharedMemory,
}

impl RememberTool {
    pub fn new(memory: SharedMemory) -> Self {
        Self { memory }
    }
}

#[derive(Deserialize)]
struct RememberArgs {
    key: String,
    value: String,
    category: Option<String>,
}

#[async_trait]
impl ToolTrait for RememberTool {
    fn name(&self) -> &str {
        "remember"
    }
    fn description(&self) -> &str {
        "Store a fact about this repository for future sessions, e.g. build commands or conventions."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": { "type": "string", "description": "Short name for the fact" },
                "value": { "type": "string", "description": "The fact itself" },
                "category": { "type": "string", "description": "Grouping, e.g. build, style, architecture" }
            },
            "required": ["key", "value"]
        })
    }
    fn class(&self) -> ToolClass {
        ToolClass::Memory
    }
    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, ToolError> {
        let args: RememberArgs = serde_json::from_value(args)?;
        let item = self
            .memory
            .lock()
            .await
            .add(args.key, args.value, args.category.as_deref())
            .map_err(|e| ToolError::Validation(e.to_string()))?;

        // the loop flushes again when the run ends
        let memory = Arc::clone(&self.memory);
        tokio::spawn(async move {
            if let Err(e) = memory.lock().await.flush().await {
                warn!("failed to save repository memory: {}", e);
            }
        });

        Ok(format!("Remembered {} ({})", item.key, item.category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_remember_persists_in_background() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mem.json");
        let memory = Arc::new(Mutex::new(RepositoryMemory::new(&path)));
        let tool = RememberTool::new(Arc::clone(&memory));

        let out = tool
            .execute(
                json!({"key": "build", "value": "cargo build", "category": "commands"}),
                &ToolContext::new(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(out, "Remembered build (commands)");
        assert_eq!(memory.lock().await.len(), 1);

        for _ in 0..50 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        // the save task holds the lock while writing
        drop(memory.lock().await);
        let reloaded = RepositoryMemory::load(&path).await;
        assert_eq!(reloaded.get("build", None).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(Mutex::new(RepositoryMemory::new(dir.path().join("m.json"))));
        let err = RememberTool::new(memory)
            .execute(json!({"key": " ", "value": "x"}), &ToolContext::new(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }
}
