//! OpenAI-compatible chat-completions adapter.
//!
//! Talks to any endpoint speaking the chat-completions function-calling
//! dialect (OpenAI, DeepSeek, most gateways). The request is made
//! non-streaming; the full assistant text is forwarded as a single
//! fragment, followed by any tool calls, then `Done` with usage.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::AiConfig;
use crate::core::error::{CoreError, CoreResult};
use crate::core::model::{AdapterEvent, AdapterMessage, ModelAdapter, Usage};
use crate::core::tools::ToolSpec;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatAdapter {
    client: Client,
}

impl OpenAiCompatAdapter {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn tool_definitions(tools: &[ToolSpec]) -> Vec<Value> {
        tools
            .iter()
            .map(|spec| {
                let mut properties = serde_json::Map::new();
                let mut required = Vec::new();
                for param in &spec.parameters {
                    properties.insert(
                        param.name.clone(),
                        json!({
                            "type": param.kind.schema_name(),
                            "description": param.description,
                        }),
                    );
                    if param.required {
                        required.push(param.name.clone());
                    }
                }
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": {
                            "type": "object",
                            "properties": properties,
                            "required": required,
                        },
                    },
                })
            })
            .collect()
    }
}

impl Default for OpenAiCompatAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object.
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl ModelAdapter for OpenAiCompatAdapter {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn send(
        &self,
        messages: &[AdapterMessage],
        tools: &[ToolSpec],
        config: &AiConfig,
        cancel: CancellationToken,
    ) -> CoreResult<mpsc::Receiver<AdapterEvent>> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| CoreError::model_failure("api_key is required for this provider"))?;
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));

        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();
        let mut body = json!({
            "model": config.model,
            "messages": wire_messages,
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
            "top_p": config.top_p,
            "frequency_penalty": config.frequency_penalty,
            "presence_penalty": config.presence_penalty,
        });
        if !tools.is_empty() {
            body["tools"] = json!(Self::tool_definitions(tools));
        }

        debug!("chat request: {} messages, {} tools", messages.len(), tools.len());
        let request = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            response = request => response.map_err(|e| {
                CoreError::model_failure(format!("request failed: {e}"))
            })?,
            _ = cancel.cancelled() => return Err(CoreError::Cancelled),
        };

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::model_failure(format!(
                "API error {status}: {detail}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::model_failure(format!("malformed response: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::model_failure("response contained no choices"))?;

        let usage = parsed
            .usage
            .map(|u| Usage {
                tokens_in: u.prompt_tokens,
                tokens_out: u.completion_tokens,
                cost: 0.0,
            })
            .unwrap_or_default();

        let (tx, rx) = mpsc::channel(16);
        if let Some(content) = choice.message.content {
            if !content.is_empty() {
                let _ = tx.send(AdapterEvent::TextFragment(content)).await;
            }
        }
        for call in choice.message.tool_calls {
            let parameters: Value =
                serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
            let _ = tx
                .send(AdapterEvent::ToolCall {
                    id: call.id,
                    name: call.function.name,
                    parameters,
                })
                .await;
        }
        let _ = tx.send(AdapterEvent::Done { usage }).await;
        Ok(rx)
    }
}
