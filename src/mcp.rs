//! Model Context Protocol client
//!
//! Just enough of MCP to discover a provider's tools and call them:
//! `initialize`, `notifications/initialized`, `tools/list`, `tools/call`.

mod client;
mod http;
mod protocol;
mod stdio;

pub use client::McpClient;
pub use http::HttpTransport;
pub use protocol::*;
pub use stdio::StdioTransport;

#[cfg(test)]
pub(crate) use client::tests::ScriptedTransport;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Server error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("Server disconnected")]
    Disconnected,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for McpError {
    fn from(e: reqwest::Error) -> Self {
        McpError::Transport(e.to_string())
    }
}

pub type McpResult<T> = Result<T, McpError>;

/// Carries JSON-RPC messages to one provider
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for the response with the same id
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse>;

    /// Send a notification; no response is expected
    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()>;
}
