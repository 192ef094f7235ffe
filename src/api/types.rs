//! API request and response types

use crate::db::{Message, Role, ThreadSummary};
use serde::{Deserialize, Serialize};

/// Request to run a turn. Missing fields read as blank and are rejected.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub thread_id: String,
}

/// Response with all known threads
#[derive(Debug, Serialize)]
pub struct ThreadListResponse {
    pub threads: Vec<ThreadSummary>,
}

/// One message as shown to the client
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl HistoryMessage {
    /// User and assistant messages only; tool results stay internal
    pub fn from_message(message: &Message) -> Option<Self> {
        match message.role {
            Role::User | Role::Assistant => Some(Self {
                role: message.role,
                content: message.content.flatten(),
            }),
            Role::Tool => None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub name: &'static str,
    pub version: &'static str,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
