//! Agent loop against a mockall provider

use async_trait::async_trait;
use mockall::{mock, Sequence};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use skipper_agent::tools::ReadFileTool;
use skipper_agent::{AgentLoop, RetryPolicy, StopReason, ToolRegistry};
use skipper_provider::{ChatParams, ChatResponse, Provider, ProviderError, Role, ToolCall};

mock! {
    pub Llm {}

    #[async_trait]
    impl Provider for Llm {
        async fn complete(&self, params: ChatParams) -> Result<ChatResponse, ProviderError>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

#[tokio::test]
async fn test_tool_result_reaches_next_request() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "remember the milk").unwrap();

    let mut mock = MockLlm::new();
    let mut seq = Sequence::new();
    mock.expect_complete()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|params| params.model == "mock-model" && params.tools.len() == 1)
        .returning(|_| {
            Ok(ChatResponse::tools(vec![ToolCall::new(
                "call_1",
                "read_file",
                json!({"path": "notes.txt"}),
            )]))
        });
    mock.expect_complete()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|params| {
            let last = params.messages.last().unwrap();
            last.role == Role::Tool
                && last.tool_call_id.as_deref() == Some("call_1")
                && last.text() == "remember the milk"
        })
        .returning(|_| Ok(ChatResponse::text("Buy milk.")));

    let mut registry = ToolRegistry::new(dir.path());
    registry.register(ReadFileTool).unwrap();
    let mut agent = AgentLoop::builder(Arc::new(mock))
        .tools(registry)
        .model("mock-model")
        .retry(RetryPolicy::none())
        .build();
    agent.add_user_message("what do my notes say?");

    let outcome = agent.run(5, &CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.stop, StopReason::Done);
    assert_eq!(outcome.final_text.as_deref(), Some("Buy milk."));
    assert_eq!(outcome.steps, 2);
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let mut mock = MockLlm::new();
    mock.expect_complete().times(1).returning(|_| {
        Err(ProviderError::Api {
            status: 400,
            message: "bad request".to_string(),
        })
    });

    let mut agent = AgentLoop::builder(Arc::new(mock))
        .model("mock-model")
        .retry(RetryPolicy::immediate(3))
        .build();
    agent.add_user_message("hi");

    let err = agent.run(5, &CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("400"));
    assert_eq!(agent.conversation().len(), 1);
}
