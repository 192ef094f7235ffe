//! MCP session on top of a transport

use super::{
    CallToolResult, HttpTransport, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, ListToolsResult, McpError, McpResult, McpTransport, StdioTransport, ToolInfo,
};
use crate::config::{ProviderConfig, TransportConfig};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bound on `tools/list` pages followed for one provider
const MAX_LIST_PAGES: usize = 32;

pub struct McpClient {
    provider: String,
    transport: Box<dyn McpTransport>,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(provider: impl Into<String>, transport: Box<dyn McpTransport>) -> Self {
        Self {
            provider: provider.into(),
            transport,
            next_id: AtomicU64::new(1),
        }
    }

    /// Open the configured transport and complete the handshake
    pub async fn connect(provider: &str, config: &ProviderConfig) -> McpResult<Self> {
        let transport: Box<dyn McpTransport> = match &config.transport {
            TransportConfig::Stdio(stdio) => {
                Box::new(StdioTransport::spawn(provider, stdio, config.timeout())?)
            }
            TransportConfig::StreamableHttp(http) => {
                Box::new(HttpTransport::new(http, config.timeout())?)
            }
        };

        let client = Self::new(provider, transport);
        let info = client.initialize().await?;
        tracing::info!(
            provider,
            server = ?info.server_info.as_ref().map(|s| &s.name),
            protocol = ?info.protocol_version,
            "MCP provider initialized"
        );
        Ok(client)
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub async fn initialize(&self) -> McpResult<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::default())?;
        let result = self.call("initialize", Some(params)).await?;
        self.transport
            .notify(JsonRpcNotification::new("notifications/initialized"))
            .await?;
        Ok(result)
    }

    /// All tools the provider advertises, following pagination cursors
    pub async fn list_tools(&self) -> McpResult<Vec<ToolInfo>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult = self.call("tools/list", params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(provider = %self.provider, "Stopped following tools/list pagination");
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
        self.call(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
        )
        .await
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> McpResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .transport
            .request(JsonRpcRequest::new(id, method, params))
            .await?;

        if let Some(error) = response.error {
            return Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = response
            .result
            .ok_or_else(|| McpError::Protocol(format!("{method} response has no result")))?;
        Ok(serde_json::from_value(result)?)
    }
}
