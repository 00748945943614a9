//! Command execution tool

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ToolClass, ToolContext, ToolError, ToolTrait};

const MAX_OUTPUT_BYTES: usize = 10_000;

/// Runs a command line with `sh -c` in the workspace, in its own process
/// group. The whole group is killed when the call times out or is dropped.
pub struct ExecTool {
    default_timeout_secs: u64,
    max_timeout_secs: u64,
}

impl ExecTool {
    pub fn new(default_timeout_secs: u64, max_timeout_secs: u64) -> Self {
        let max_timeout_secs = max_timeout_secs.max(1);
        Self {
            default_timeout_secs: default_timeout_secs.clamp(1, max_timeout_secs),
            max_timeout_secs,
        }
    }

    /// Requested timeout, falling back to the default and clamped to the max
    pub fn effective_timeout(&self, requested: Option<u64>) -> u64 {
        match requested {
            Some(0) | None => self.default_timeout_secs,
            Some(secs) => secs.min(self.max_timeout_secs),
        }
    }
}

impl Default for ExecTool {
    fn default() -> Self {
        Self::new(120, 600)
    }
}

#[derive(Deserialize)]
struct ExecArgs {
    command: String,
    timeout: Option<u64>,
}

/// Kills a process group on drop unless disarmed
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    debug!(pgid, "killing process group");
    // SAFETY: killpg only sends a signal. The group was created by
    // process_group(0) for this call's child.
    unsafe {
        libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

fn truncate(mut text: String) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text;
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let dropped = text.len() - end;
    text.truncate(end);
    text.push_str(&format!("\n... (output truncated, {} more bytes)", dropped));
    text
}

#[async_trait]
impl ToolTrait for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }
    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its output."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command line, run with sh -c" },
                "timeout": { "type": "integer", "description": "Timeout in seconds" }
            },
            "required": ["command"]
        })
    }
    fn class(&self) -> ToolClass {
        ToolClass::Command
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: ExecArgs = serde_json::from_value(args)?;
        let timeout_secs = self.effective_timeout(args.timeout);

        debug!(command = %args.command, timeout_secs, "executing command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| ToolError::Failed(format!("failed to start command: {}", e)))?;
        let mut group = ProcessGroupGuard::new(child.id());

        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ToolError::Io(e)),
            Err(_) => {
                warn!(command = %args.command, timeout_secs, "command timed out");
                return Err(ToolError::Timeout(timeout_secs));
            }
        };
        group.disarm();

        let mut parts = Vec::new();
        if !output.stdout.is_empty() {
            parts.push(String::from_utf8_lossy(&output.stdout).to_string());
        }
        if !output.stderr.is_empty() {
            parts.push(format!(
                "STDERR:\n{}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        let text = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            truncate(parts.join("\n"))
        };

        if output.status.success() {
            Ok(text)
        } else {
            let code = output.status.code().unwrap_or(-1);
            Err(ToolError::Failed(format!("exit code {}\n{}", code, text)))
        }
    }
}
