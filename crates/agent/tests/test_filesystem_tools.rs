//! Tests for file tools behind a sandboxed registry

mod common;

use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{call, workspace_sandbox};
use skipper_agent::tools::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use skipper_agent::{ToolRegistry, ToolResult, ToolTrait};

fn file_registry(dir: &TempDir) -> ToolRegistry {
    let mut registry = ToolRegistry::new(dir.path()).with_sandbox(workspace_sandbox(dir.path()));
    registry.register(ReadFileTool).unwrap();
    registry.register(WriteFileTool).unwrap();
    registry.register(EditFileTool).unwrap();
    registry.register(ListDirTool).unwrap();
    registry
}

async fn run(registry: &ToolRegistry, name: &str, args: Value) -> ToolResult {
    registry
        .dispatch(&call("call_1", name, args), &CancellationToken::new())
        .await
}

// ============================================================================
// Outside the workspace
// ============================================================================

#[tokio::test]
async fn test_read_file_tool_outside_workspace() {
    let outside = TempDir::new().unwrap();
    let secret = outside.path().join("outside.txt");
    fs::write(&secret, "secret").unwrap();

    let dir = TempDir::new().unwrap();
    let result = run(
        &file_registry(&dir),
        "read_file",
        json!({"path": secret.to_str().unwrap()}),
    )
    .await;

    assert!(!result.success);
    assert!(
        result.content.contains("outside the allowed roots"),
        "Expected sandbox denial, got: {}",
        result.content
    );
    assert!(!result.content.contains("secret\n"));
}

#[tokio::test]
async fn test_write_file_tool_outside_workspace() {
    let outside = TempDir::new().unwrap();
    let target = outside.path().join("outside.txt");

    let dir = TempDir::new().unwrap();
    let result = run(
        &file_registry(&dir),
        "write_file",
        json!({"path": target.to_str().unwrap(), "content": "test"}),
    )
    .await;

    assert!(!result.success);
    assert!(result.content.starts_with("Error: sandbox denied"));
    assert!(!target.exists());
}

#[tokio::test]
async fn test_edit_file_tool_outside_workspace() {
    let outside = TempDir::new().unwrap();
    let target = outside.path().join("config.txt");
    fs::write(&target, "mode = safe").unwrap();

    let dir = TempDir::new().unwrap();
    let result = run(
        &file_registry(&dir),
        "edit_file",
        json!({"path": target.to_str().unwrap(), "old_string": "safe", "new_string": "unsafe"}),
    )
    .await;

    assert!(!result.success);
    assert_eq!(fs::read_to_string(&target).unwrap(), "mode = safe");
}

#[tokio::test]
async fn test_list_dir_tool_outside_workspace() {
    let dir = TempDir::new().unwrap();
    let result = run(&file_registry(&dir), "list_dir", json!({"path": "/etc"})).await;
    assert!(!result.success);
    assert!(result.content.contains("outside the allowed roots"));
}

#[tokio::test]
async fn test_path_traversal_escape_attempt() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    let registry = file_registry(&dir);

    for path in ["../escape.txt", "src/../../escape.txt", "./src/../../../escape.txt"] {
        let result = run(
            &registry,
            "write_file",
            json!({"path": path, "content": "pwned"}),
        )
        .await;
        assert!(!result.success, "{} was allowed", path);
    }
    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
}

#[tokio::test]
async fn test_oversize_read_and_edit_denied() {
    let dir = TempDir::new().unwrap();
    let config = skipper_config::SandboxConfig {
        max_file_bytes: 16,
        ..Default::default()
    };
    let policy = skipper_agent::SandboxPolicy::from_config(&config, dir.path());
    let mut registry =
        ToolRegistry::new(dir.path()).with_sandbox(skipper_agent::Sandbox::new(policy));
    registry.register(ReadFileTool).unwrap();
    registry.register(EditFileTool).unwrap();
    fs::write(dir.path().join("big.txt"), "x".repeat(64)).unwrap();

    let read = run(&registry, "read_file", json!({"path": "big.txt", "limit": 1})).await;
    assert!(!read.success);
    assert!(read.content.contains("64 bytes, over the 16 byte limit"));

    let edit = run(
        &registry,
        "edit_file",
        json!({"path": "big.txt", "old_string": "x", "new_string": "y", "replace_all": true}),
    )
    .await;
    assert!(!edit.success);
    assert_eq!(fs::read_to_string(dir.path().join("big.txt")).unwrap(), "x".repeat(64));
}

// ============================================================================
// Inside the workspace
// ============================================================================

#[tokio::test]
async fn test_read_file_tool_in_workspace() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("notes.md"), "line 0\nline 1\nline 2\nline 3\n").unwrap();
    let registry = file_registry(&dir);

    let whole = run(&registry, "read_file", json!({"path": "notes.md"})).await;
    assert!(whole.success);
    assert_eq!(whole.content, "line 0\nline 1\nline 2\nline 3\n");

    let window = run(
        &registry,
        "read_file",
        json!({"path": "notes.md", "offset": 1, "limit": 2}),
    )
    .await;
    assert_eq!(window.content, "line 1\nline 2\n");
}

#[tokio::test]
async fn test_write_file_tool_creates_directories_in_workspace() {
    let dir = TempDir::new().unwrap();
    let result = run(
        &file_registry(&dir),
        "write_file",
        json!({"path": "deep/nested/out.txt", "content": "hello"}),
    )
    .await;

    assert!(result.success, "{}", result.content);
    assert_eq!(result.content, "Wrote 5 bytes to deep/nested/out.txt");
    assert_eq!(
        fs::read_to_string(dir.path().join("deep/nested/out.txt")).unwrap(),
        "hello"
    );
}

#[tokio::test]
async fn test_edit_file_tool_in_workspace() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("main.rs"), "fn main() {\n    old();\n}\n").unwrap();
    let registry = file_registry(&dir);

    let result = run(
        &registry,
        "edit_file",
        json!({"path": "main.rs", "old_string": "old()", "new_string": "new()"}),
    )
    .await;
    assert!(result.success, "{}", result.content);
    assert_eq!(
        fs::read_to_string(dir.path().join("main.rs")).unwrap(),
        "fn main() {\n    new();\n}\n"
    );
}

#[tokio::test]
async fn test_edit_file_tool_target_not_found_in_workspace() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "alpha").unwrap();
    let result = run(
        &file_registry(&dir),
        "edit_file",
        json!({"path": "a.txt", "old_string": "beta", "new_string": "gamma"}),
    )
    .await;
    assert!(!result.success);
    assert!(result.content.contains("old_string not found in a.txt"));
}

#[tokio::test]
async fn test_edit_file_tool_ambiguous_target_in_workspace() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "x = 1\nx = 1\n").unwrap();
    let registry = file_registry(&dir);

    let ambiguous = run(
        &registry,
        "edit_file",
        json!({"path": "a.txt", "old_string": "x = 1", "new_string": "x = 2"}),
    )
    .await;
    assert!(!ambiguous.success);
    assert!(ambiguous.content.contains("ambiguous: 2 matches"));

    let all = run(
        &registry,
        "edit_file",
        json!({"path": "a.txt", "old_string": "x = 1", "new_string": "x = 2", "replace_all": true}),
    )
    .await;
    assert!(all.success);
    assert_eq!(all.content, "Replaced 2 occurrences in a.txt");
}

#[tokio::test]
async fn test_read_file_tool_not_found_in_workspace() {
    let dir = TempDir::new().unwrap();
    let result = run(&file_registry(&dir), "read_file", json!({"path": "missing.txt"})).await;
    assert!(!result.success);
    assert!(result.content.contains("file not found: missing.txt"));
}

#[tokio::test]
async fn test_read_file_tool_not_a_file_in_workspace() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("sub")).unwrap();
    let result = run(&file_registry(&dir), "read_file", json!({"path": "sub"})).await;
    assert!(!result.success);
    assert!(result.content.contains("not a file: sub"));
}

#[tokio::test]
async fn test_list_dir_tool_in_workspace() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(dir.path().join("Cargo.toml"), "").unwrap();
    fs::write(dir.path().join("README.md"), "").unwrap();

    let result = run(&file_registry(&dir), "list_dir", json!({"path": "."})).await;
    assert!(result.success);
    assert_eq!(result.content, "[DIR] src\n[FILE] Cargo.toml\n[FILE] README.md");
}

#[tokio::test]
async fn test_list_dir_tool_not_a_directory_in_workspace() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("file.txt"), "").unwrap();
    let result = run(&file_registry(&dir), "list_dir", json!({"path": "file.txt"})).await;
    assert!(!result.success);
    assert!(result.content.contains("not a directory"));
}

#[tokio::test]
async fn test_list_dir_tool_empty_directory_in_workspace() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("empty")).unwrap();
    let result = run(&file_registry(&dir), "list_dir", json!({"path": "empty"})).await;
    assert!(result.success);
    assert_eq!(result.content, "empty is empty");
}

#[test]
fn test_filesystem_tool_metadata() {
    let tools: Vec<Box<dyn ToolTrait>> = vec![
        Box::new(ReadFileTool),
        Box::new(WriteFileTool),
        Box::new(EditFileTool),
        Box::new(ListDirTool),
    ];
    let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["read_file", "write_file", "edit_file", "list_dir"]);

    for tool in &tools {
        let params = tool.parameters();
        assert_eq!(params["type"], "object");
        assert!(params["required"]
            .as_array()
            .unwrap()
            .contains(&json!("path")));
        assert!(!tool.description().is_empty());
    }
}
