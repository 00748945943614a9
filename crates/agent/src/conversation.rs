//! Append-only conversation log

use std::collections::HashMap;

use skipper_provider::{Message, Role, ToolCall};

use crate::tools::ToolResult;

/// Ordered log of turns. Messages are only ever appended; a tool-calling
/// turn is committed whole, assistant message and all its results at once.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log seeded with a system turn
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    /// Append an assistant turn carrying `calls` followed by exactly one tool
    /// message per call, in call order, matched by call id. A call with no
    /// result gets a failure message so the pairing always holds.
    pub fn commit_tool_turn(
        &mut self,
        content: Option<String>,
        calls: Vec<ToolCall>,
        results: Vec<ToolResult>,
    ) {
        let mut by_id: HashMap<String, ToolResult> = results
            .into_iter()
            .map(|r| (r.call_id.clone(), r))
            .collect();

        let tool_messages: Vec<Message> = calls
            .iter()
            .map(|call| {
                let result = by_id
                    .remove(&call.id)
                    .unwrap_or_else(|| ToolResult::failure(&call.id, "no result was produced"));
                Message::tool(&call.id, &call.name, result.message_content())
            })
            .collect();

        self.messages.push(Message::assistant_with_tools(content, calls));
        self.messages.extend(tool_messages);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Text of the most recent assistant message that has any
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .find_map(|m| m.content.as_deref().filter(|c| !c.is_empty()))
    }

    /// Number of tool-calling turns
    pub fn tool_turns(&self) -> usize {
        self.messages.iter().filter(|m| m.has_tool_calls()).count()
    }
}
