//! Filesystem locations used by skipper

use std::path::{Path, PathBuf};

/// Skipper's data directory (~/.skipper)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".skipper")
}

/// Config file location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Default workspace location
pub fn workspace_path() -> PathBuf {
    data_dir().join("workspace")
}

/// Repository memory file inside a workspace
pub fn memory_file(workspace: &Path) -> PathBuf {
    workspace.join(".skipper_memory.json")
}

/// Persisted TODO list inside a workspace
pub fn todo_file(workspace: &Path) -> PathBuf {
    workspace.join(".skipper_todos.json")
}

/// Expand a leading `~` or `~/` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Ensure directory exists
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}
