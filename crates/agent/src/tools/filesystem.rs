//! File tools
//!
//! Paths arrive already resolved and authorized in [`ToolContext::path`];
//! these handlers only do the I/O.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

use super::{ToolClass, ToolContext, ToolError, ToolTrait};
use crate::sandbox::FileOperation;

fn io_failure(raw: &str, e: std::io::Error) -> ToolError {
    match e.kind() {
        ErrorKind::NotFound => ToolError::Failed(format!("file not found: {}", raw)),
        ErrorKind::PermissionDenied => ToolError::Failed(format!("permission denied: {}", raw)),
        _ => ToolError::Io(e),
    }
}

async fn read_text(path: &Path, raw: &str) -> Result<String, ToolError> {
    if path.is_dir() {
        return Err(ToolError::Failed(format!("not a file: {}", raw)));
    }
    match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8(bytes)
            .map_err(|_| ToolError::Failed(format!("not a UTF-8 text file: {}", raw))),
        Err(e) => Err(io_failure(raw, e)),
    }
}

/// Read a text file, optionally a line window
pub struct ReadFileTool;

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: usize,
}

#[async_trait]
impl ToolTrait for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }
    fn description(&self) -> &str {
        "Read a UTF-8 text file. Use offset (0-based line) and limit (line count) to read part of a large file."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace or absolute" },
                "offset": { "type": "integer", "description": "First line to return, 0-based" },
                "limit": { "type": "integer", "description": "Number of lines to return; 0 reads everything" }
            },
            "required": ["path"]
        })
    }
    fn class(&self) -> ToolClass {
        ToolClass::File(FileOperation::Read)
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: ReadFileArgs = serde_json::from_value(args)?;
        let path = ctx.target_path()?;
        debug!("reading {:?}", path);

        let content = read_text(path, &args.path).await?;
        if args.limit == 0 {
            return Ok(content);
        }
        Ok(content
            .split_inclusive('\n')
            .skip(args.offset)
            .take(args.limit)
            .collect())
    }
}

/// Create or overwrite a file
pub struct WriteFileTool;

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[async_trait]
impl ToolTrait for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }
    fn description(&self) -> &str {
        "Write content to a file, creating parent directories. Overwrites an existing file."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace or absolute" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }
    fn class(&self) -> ToolClass {
        ToolClass::File(FileOperation::Write)
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: WriteFileArgs = serde_json::from_value(args)?;
        let path = ctx.target_path()?;
        debug!("writing {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure(&args.path, e))?;
        }
        tokio::fs::write(path, &args.content)
            .await
            .map_err(|e| io_failure(&args.path, e))?;
        Ok(format!(
            "Wrote {} bytes to {}",
            args.content.len(),
            args.path
        ))
    }
}

/// Exact string replacement inside a file
pub struct EditFileTool;

#[derive(Deserialize)]
struct EditFileArgs {
    path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[async_trait]
impl ToolTrait for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }
    fn description(&self) -> &str {
        "Replace old_string with new_string in a file. old_string must match exactly and be unique unless replace_all is set."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace or absolute" },
                "old_string": { "type": "string", "description": "Exact text to replace" },
                "new_string": { "type": "string", "description": "Replacement text" },
                "replace_all": { "type": "boolean", "description": "Replace every occurrence" }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }
    fn class(&self) -> ToolClass {
        ToolClass::File(FileOperation::Edit)
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: EditFileArgs = serde_json::from_value(args)?;
        let path = ctx.target_path()?;
        debug!("editing {:?}", path);

        if args.old_string.is_empty() {
            return Err(ToolError::Validation("old_string must not be empty".to_string()));
        }
        let content = read_text(path, &args.path).await?;
        let count = content.matches(&args.old_string).count();
        let updated = match count {
            0 => {
                return Err(ToolError::Failed(format!(
                    "old_string not found in {}",
                    args.path
                )))
            }
            1 => content.replacen(&args.old_string, &args.new_string, 1),
            n if args.replace_all => {
                debug!("replacing {} occurrences in {:?}", n, path);
                content.replace(&args.old_string, &args.new_string)
            }
            n => {
                return Err(ToolError::Failed(format!(
                    "old_string is ambiguous: {} matches in {}; add context or set replace_all",
                    n, args.path
                )))
            }
        };
        tokio::fs::write(path, updated)
            .await
            .map_err(|e| io_failure(&args.path, e))?;
        Ok(format!(
            "Replaced {} occurrence{} in {}",
            count,
            if count == 1 { "" } else { "s" },
            args.path
        ))
    }
}

/// List a directory
pub struct ListDirTool;

#[derive(Deserialize)]
struct ListDirArgs {
    path: String,
}

#[async_trait]
impl ToolTrait for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }
    fn description(&self) -> &str {
        "List the entries of a directory."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory path, relative to the workspace or absolute" }
            },
            "required": ["path"]
        })
    }
    fn class(&self) -> ToolClass {
        ToolClass::File(FileOperation::List)
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let args: ListDirArgs = serde_json::from_value(args)?;
        let path = ctx.target_path()?;
        debug!("listing {:?}", path);

        if path.is_file() {
            return Err(ToolError::Failed(format!("not a directory: {}", args.path)));
        }
        let mut entries = tokio::fs::read_dir(path)
            .await
            .map_err(|e| io_failure(&args.path, e))?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let prefix = if entry.file_type().await?.is_dir() {
                "[DIR]"
            } else {
                "[FILE]"
            };
            items.push(format!("{} {}", prefix, name));
        }
        items.sort();
        if items.is_empty() {
            Ok(format!("{} is empty", args.path))
        } else {
            Ok(items.join("\n"))
        }
    }
}
