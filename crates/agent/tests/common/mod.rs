//! Scripted model services for loop tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use skipper_agent::{Sandbox, SandboxPolicy};
use skipper_provider::{ChatParams, ChatResponse, Provider, ProviderError, ToolCall};

/// Replays a fixed list of responses and records every request
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ChatResponse, ProviderError>>>,
    requests: Mutex<Vec<ChatParams>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ChatResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, idx: usize) -> ChatParams {
        self.requests.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, params: ChatParams) -> skipper_provider::Result<ChatResponse> {
        self.requests.lock().unwrap().push(params);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ChatResponse::text("(script exhausted)")))
    }

    fn default_model(&self) -> String {
        "scripted".to_string()
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// Answers every request with the same tool call under a fresh id
pub struct RepeatProvider {
    name: String,
    arguments: Value,
    calls: AtomicUsize,
}

impl RepeatProvider {
    pub fn new(name: &str, arguments: Value) -> Self {
        Self {
            name: name.to_string(),
            arguments,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for RepeatProvider {
    async fn complete(&self, _params: ChatParams) -> skipper_provider::Result<ChatResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse::tools(vec![ToolCall::new(
            format!("call_{}", n),
            &self.name,
            self.arguments.clone(),
        )]))
    }

    fn default_model(&self) -> String {
        "repeat".to_string()
    }

    fn is_configured(&self) -> bool {
        true
    }
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::new(id, name, arguments)
}

pub fn tool_turn(calls: Vec<ToolCall>) -> Result<ChatResponse, ProviderError> {
    Ok(ChatResponse::tools(calls))
}

pub fn text(content: &str) -> Result<ChatResponse, ProviderError> {
    Ok(ChatResponse::text(content))
}

/// Sandbox allowing only `workspace`, with the default command deny-list
pub fn workspace_sandbox(workspace: &Path) -> Sandbox {
    let config = skipper_config::SandboxConfig::default();
    Sandbox::new(SandboxPolicy::from_config(&config, workspace))
}
