//! OpenAI-compatible chat completions client

use crate::*;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, trace};

/// Client for any endpoint speaking the `/chat/completions` dialect
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
        }
    }

    /// Build from the `provider` config section
    pub fn from_config(config: &skipper_config::ProviderConfig) -> Self {
        Self::new(
            config.api_key.trim(),
            config.api_base.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn build_request(&self, params: &ChatParams) -> Value {
        let model = if params.model.is_empty() {
            self.default_model.clone()
        } else {
            params.model.clone()
        };

        let messages: Vec<Value> = params.messages.iter().map(encode_message).collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });

        if !params.tools.is_empty() {
            body["tools"] = json!(params.tools);
            body["tool_choice"] = match &params.tool_choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::Required(name) => {
                    json!({"type": "function", "function": {"name": name}})
                }
                ToolChoice::None => json!("none"),
            };
        }

        body
    }

    fn parse_response(&self, body: Value) -> Result<ChatResponse> {
        let choice = body["choices"]
            .get(0)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".to_string()))?;
        let message = &choice["message"];
        let content = message["content"].as_str().map(|s| s.to_string());
        let finish_reason = choice["finish_reason"]
            .as_str()
            .unwrap_or("stop")
            .to_string();

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let function = &call["function"];
                tool_calls.push(ToolCall {
                    id: call["id"].as_str().unwrap_or("").to_string(),
                    name: function["name"].as_str().unwrap_or("").to_string(),
                    arguments: decode_arguments(&function["arguments"]),
                });
            }
        }

        let usage = match body["usage"].as_object() {
            Some(usage) => Usage {
                prompt_tokens: token_count(usage.get("prompt_tokens")),
                completion_tokens: token_count(usage.get("completion_tokens")),
                total_tokens: token_count(usage.get("total_tokens")),
            },
            None => Usage::default(),
        };

        Ok(ChatResponse {
            content,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

fn encode_message(m: &Message) -> Value {
    let mut obj = json!({ "role": m.role.as_str() });
    if let Some(content) = &m.content {
        obj["content"] = json!(content);
    } else {
        obj["content"] = Value::Null;
    }
    if let Some(calls) = m.tool_calls.as_ref().filter(|c| !c.is_empty()) {
        let wire: Vec<Value> = calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "arguments": c.arguments.to_string(),
                    }
                })
            })
            .collect();
        obj["tool_calls"] = json!(wire);
    }
    if let Some(tool_call_id) = &m.tool_call_id {
        obj["tool_call_id"] = json!(tool_call_id);
    }
    if let Some(name) = &m.name {
        obj["name"] = json!(name);
    }
    obj
}

/// Arguments arrive as a JSON-encoded string; some servers send the object
/// directly. Unparseable strings are kept as-is so response validation can
/// reject them.
fn decode_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| raw.clone()),
        Value::Null => json!({}),
        other => other.clone(),
    }
}

fn token_count(v: Option<&Value>) -> u32 {
    v.and_then(Value::as_u64).unwrap_or(0) as u32
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, params: ChatParams) -> Result<ChatResponse> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }

        let url = format!("{}/chat/completions", self.api_base);
        trace!("POST {}", url);
        let body = self.build_request(&params);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
                .unwrap_or_else(|| text.chars().take(200).collect());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::InvalidResponse(format!("body is not JSON: {}", e)))?;

        let response = self.parse_response(json)?;
        debug!(
            tool_calls = response.tool_calls.len(),
            total_tokens = response.usage.total_tokens,
            "model response received"
        );
        Ok(response)
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}
