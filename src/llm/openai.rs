//! `OpenAI`-compatible chat completions, consumed as a token stream

use super::types::{LlmRequest, LlmResponse, ModelOutput, Usage};
use super::{DeltaSink, LlmConfig, LlmError, LlmService};
use crate::db::{Message, Role, ToolCallRequest};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// OpenAI-compatible service implementation
pub struct OpenAIService {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
}

impl OpenAIService {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| LlmError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }

    fn translate_request<'a>(&'a self, request: &'a LlmRequest) -> OpenAIRequest<'a> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system) = &request.system {
            messages.push(OpenAIMessage {
                role: "system",
                content: Some(system.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        messages.extend(request.messages.iter().map(translate_message));

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAITool {
                        r#type: "function",
                        function: OpenAIFunction {
                            name: &t.name,
                            description: &t.description,
                            parameters: &t.input_schema,
                        },
                    })
                    .collect(),
            )
        };

        OpenAIRequest {
            model: &self.model,
            messages,
            tools,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        }
    }
}

fn translate_message(msg: &Message) -> OpenAIMessage {
    match msg.role {
        Role::User => OpenAIMessage {
            role: "user",
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: None,
        },
        Role::Assistant => {
            let text = msg.text();
            let tool_calls: Vec<OpenAIToolCall> = msg
                .tool_calls
                .iter()
                .map(|call| OpenAIToolCall {
                    id: call.id.clone(),
                    r#type: "function",
                    function: OpenAIFunctionCall {
                        name: call.tool_name.clone(),
                        arguments: serde_json::to_string(&call.arguments)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                })
                .collect();

            OpenAIMessage {
                role: "assistant",
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(text)
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            }
        }
        Role::Tool => OpenAIMessage {
            role: "tool",
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: msg.tool_call_id.clone(),
        },
    }
}

#[async_trait]
impl LlmService for OpenAIService {
    async fn complete(
        &self,
        request: &LlmRequest,
        on_delta: DeltaSink<'_>,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.translate_request(request);

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAIErrorResponse>(&text)
                .map_or(text, |e| e.error.message);
            return Err(LlmError::from_status(status.as_u16(), &message));
        }

        let mut events = std::pin::pin!(response.bytes_stream().eventsource());
        let mut text = String::new();
        let mut tool_calls = ToolCallAccumulator::default();
        let mut usage = Usage::default();
        let mut finished = false;

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| LlmError::stream(e.to_string()))?;
            if event.data.trim() == "[DONE]" {
                finished = true;
                break;
            }

            let chunk: ChatChunk = serde_json::from_str(&event.data)
                .map_err(|e| LlmError::stream(format!("Malformed stream chunk: {e}")))?;
            if let Some(error) = chunk.error {
                return Err(LlmError::stream(error.message));
            }
            if let Some(u) = chunk.usage {
                usage = Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                };
            }

            for choice in chunk.choices {
                if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                    on_delta(&content);
                    text.push_str(&content);
                }
                if let Some(calls) = choice.delta.tool_calls {
                    tool_calls.push(calls);
                }
            }
        }

        if !finished {
            return Err(LlmError::stream("Stream ended before [DONE]"));
        }

        let message = Message::assistant(text, tool_calls.into_calls()?);
        Ok(LlmResponse {
            output: ModelOutput::from_message(message),
            usage,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Reassembles streamed tool-call fragments, keyed by their index
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    fn push(&mut self, fragments: Vec<StreamToolCall>) {
        for fragment in fragments {
            let entry = self.calls.entry(fragment.index).or_default();
            if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
                entry.id = Some(id);
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                    entry.name = Some(name);
                }
                if let Some(args) = function.arguments {
                    entry.arguments.push_str(&args);
                }
            }
        }
    }

    /// Completed calls in index order. Fragments that never received a name
    /// are dropped; arguments that are not valid JSON fail the response.
    fn into_calls(self) -> Result<Vec<ToolCallRequest>, LlmError> {
        let mut calls = Vec::with_capacity(self.calls.len());
        for partial in self.calls.into_values() {
            let Some(name) = partial.name else {
                tracing::warn!("Dropping streamed tool call without a name");
                continue;
            };
            let id = partial
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            let arguments = if partial.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&partial.arguments).map_err(|e| {
                    LlmError::stream(format!("Invalid arguments for tool call {name}: {e}"))
                })?
            };
            calls.push(ToolCallRequest::new(id, name, arguments));
        }
        Ok(calls)
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAITool<'a> {
    r#type: &'static str,
    function: OpenAIFunction<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    r#type: &'static str,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
    #[serde(default)]
    error: Option<OpenAIError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}
