//! Common types for LLM interactions

use crate::db::{Message, ToolCallRequest};

/// LLM request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
}

/// Tool definition offered to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// LLM response
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub output: ModelOutput,
    pub usage: Usage,
}

/// What the model produced for one request
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// Final answer; ends the turn
    Answer(Message),
    /// The model wants these tools run before it continues
    ToolRequests {
        message: Message,
        calls: Vec<ToolCallRequest>,
    },
}

impl ModelOutput {
    /// Classify an assistant message by whether it carries tool calls
    pub fn from_message(message: Message) -> Self {
        if message.tool_calls.is_empty() {
            ModelOutput::Answer(message)
        } else {
            let calls = message.tool_calls.clone();
            ModelOutput::ToolRequests { message, calls }
        }
    }

    pub fn message(&self) -> &Message {
        match self {
            ModelOutput::Answer(message) | ModelOutput::ToolRequests { message, .. } => message,
        }
    }
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
