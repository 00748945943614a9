//! Tests for the command execution tool

#![cfg(unix)]

mod common;

use serde_json::json;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{call, workspace_sandbox};
use skipper_agent::tools::ExecTool;
use skipper_agent::{ToolContext, ToolError, ToolRegistry, ToolResult, ToolTrait};

fn exec_registry(dir: &TempDir, tool: ExecTool) -> ToolRegistry {
    let mut registry = ToolRegistry::new(dir.path()).with_sandbox(workspace_sandbox(dir.path()));
    registry.register(tool).unwrap();
    registry
}

async fn exec(dir: &TempDir, command: &str) -> ToolResult {
    exec_registry(dir, ExecTool::default())
        .dispatch(
            &call("call_1", "exec", json!({"command": command})),
            &CancellationToken::new(),
        )
        .await
}

#[tokio::test]
async fn test_exec_tool_echo_in_workspace() {
    let dir = TempDir::new().unwrap();
    let result = exec(&dir, "echo 'Hello from shell'").await;
    assert!(result.success);
    assert!(result.content.contains("Hello from shell"));
}

#[tokio::test]
async fn test_exec_tool_default_to_workspace() {
    let dir = TempDir::new().unwrap();
    let result = exec(&dir, "pwd").await;
    let ws = dir.path().canonicalize().unwrap();
    assert_eq!(result.content.trim(), ws.to_str().unwrap());
}

#[tokio::test]
async fn test_exec_tool_stderr_output() {
    let dir = TempDir::new().unwrap();
    let result = exec(&dir, "echo 'warning' >&2").await;
    assert!(result.success);
    assert!(result.content.contains("STDERR:\nwarning"));
}

#[tokio::test]
async fn test_exec_tool_exit_code() {
    let dir = TempDir::new().unwrap();
    let result = exec(&dir, "echo partial; exit 42").await;
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("exit code 42"));
    assert!(error.contains("partial"));
}

#[tokio::test]
async fn test_exec_tool_empty_output() {
    let dir = TempDir::new().unwrap();
    let result = exec(&dir, "true").await;
    assert!(result.success);
    assert_eq!(result.content, "(no output)");
}

#[tokio::test]
async fn test_exec_tool_invalid_command() {
    let dir = TempDir::new().unwrap();
    let result = exec(&dir, "definitely_not_a_real_command_12345").await;
    assert!(!result.success);
    assert!(result.content.contains("exit code 127"));
}

#[tokio::test]
async fn test_exec_tool_output_truncation() {
    let dir = TempDir::new().unwrap();
    let result = exec(&dir, "head -c 20000 /dev/zero | tr '\\0' 'a'").await;
    assert!(result.success);
    assert!(result.content.contains("output truncated, 10000 more bytes"));
    assert!(result.content.len() < 10_100);
}

#[tokio::test]
async fn test_exec_tool_custom_timeout() {
    let dir = TempDir::new().unwrap();
    let registry = exec_registry(&dir, ExecTool::new(120, 600));
    let started = Instant::now();
    let result = registry
        .dispatch(
            &call("slow", "exec", json!({"command": "sleep 30", "timeout": 1})),
            &CancellationToken::new(),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("timed out after 1s"));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_exec_tool_timeout_kills_process_group() {
    let dir = TempDir::new().unwrap();
    let ctx = ToolContext::new(dir.path());
    // the background child would touch the marker after the timeout if it survived
    let err = ExecTool::new(1, 1)
        .execute(
            json!({"command": "(sleep 2; touch survived.txt) & sleep 30"}),
            &ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Timeout(1)));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!dir.path().join("survived.txt").exists());
}

#[tokio::test]
async fn test_exec_tool_cancel_kills_process_group() {
    let dir = TempDir::new().unwrap();
    let registry = exec_registry(&dir, ExecTool::default());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = registry
        .dispatch(
            &call("c", "exec", json!({"command": "(sleep 2; touch survived.txt) & sleep 30"})),
            &cancel,
        )
        .await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("cancelled"));
    assert!(started.elapsed() < Duration::from_secs(5));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!dir.path().join("survived.txt").exists());
}

#[tokio::test]
async fn test_exec_tool_cannot_escape_workspace_via_command() {
    let dir = TempDir::new().unwrap();
    for line in [
        "rm -rf ..",
        "cd .. && rm -rf .",
        "true; sudo ls",
        "echo $(dd if=/dev/zero of=x count=1)",
    ] {
        let result = exec(&dir, line).await;
        assert!(!result.success, "{} was allowed", line);
        assert!(result.content.starts_with("Error: sandbox denied"));
    }
}

#[tokio::test]
async fn test_exec_tool_expanded_command_name_denied() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("victim.txt"), "keep").unwrap();
    for line in ["X=rm; $X -f victim.txt", "bash -c '{rm,-f,victim.txt}'"] {
        let result = exec(&dir, line).await;
        assert!(!result.success, "{} was allowed", line);
        assert!(result.content.contains("only known after shell expansion"));
    }
    assert!(dir.path().join("victim.txt").exists());
}

#[test]
fn test_exec_tool_metadata() {
    let tool = ExecTool::default();
    assert_eq!(tool.name(), "exec");
    let params = tool.parameters();
    assert_eq!(params["required"], json!(["command"]));
    assert_eq!(params["properties"]["timeout"]["type"], "integer");
}
