//! Tools the model can call
//!
//! Built-in HTTP tools and tools discovered from MCP providers share the
//! [`Tool`] trait. The [`ToolDispatcher`] is assembled once at startup and
//! never changes afterwards.

mod remote;
mod stock_price;
mod web_search;

pub use remote::RemoteTool;
pub use stock_price::StockPriceTool;
pub use web_search::WebSearchTool;

use crate::config::ProviderConfig;
use crate::db::ToolCallRequest;
use crate::llm::ToolDefinition;
use crate::mcp::{McpClient, McpError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result from tool execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// Soft failure reported back to the model as `Error: <message>`
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: format!("Error: {}", message.into()),
        }
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self {
            success: false,
            output: format!("Unknown tool: {name}"),
        }
    }
}

/// A tool invocation that could not produce any output
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Provider {provider} failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: McpError,
    },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Trait for tools that can be executed by the agent
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the tool. Bad input is a soft failure (`ToolOutput::error`);
    /// `Err` is reserved for failures that leave no answer at all.
    async fn run(&self, input: Value) -> Result<ToolOutput, ToolError>;
}

/// Shared client for the built-in HTTP tools
pub fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Built-in tools; the stock quote tool needs an Alpha Vantage key
pub fn builtin_tools(
    client: &reqwest::Client,
    alphavantage_api_key: Option<&str>,
) -> Vec<Arc<dyn Tool>> {
    let mut tools: Vec<Arc<dyn Tool>> = vec![Arc::new(WebSearchTool::new(client.clone()))];
    if let Some(key) = alphavantage_api_key {
        tools.push(Arc::new(StockPriceTool::new(client.clone(), key)));
    }
    tools
}

/// Connect to every provider concurrently and collect their tools.
///
/// A provider that fails or exceeds its timeout is logged and skipped.
pub async fn discover(providers: &BTreeMap<String, ProviderConfig>) -> Vec<Arc<dyn Tool>> {
    let attempts = providers.iter().map(|(name, config)| async move {
        let start = std::time::Instant::now();
        let outcome = tokio::time::timeout(config.timeout(), discover_provider(name, config)).await;
        match outcome {
            Ok(Ok(tools)) => {
                tracing::info!(
                    provider = %name,
                    tools = tools.len(),
                    duration_ms = %start.elapsed().as_millis(),
                    "Discovered provider tools"
                );
                tools
            }
            Ok(Err(e)) => {
                tracing::warn!(provider = %name, error = %e, "Tool provider unavailable");
                vec![]
            }
            Err(_) => {
                tracing::warn!(provider = %name, timeout_ms = config.timeout_ms, "Tool provider discovery timed out");
                vec![]
            }
        }
    });

    futures::future::join_all(attempts)
        .await
        .into_iter()
        .flatten()
        .collect()
}

async fn discover_provider(
    name: &str,
    config: &ProviderConfig,
) -> Result<Vec<Arc<dyn Tool>>, McpError> {
    let client = Arc::new(McpClient::connect(name, config).await?);
    let infos = client.list_tools().await?;
    Ok(infos
        .into_iter()
        .map(|info| Arc::new(RemoteTool::new(client.clone(), info)) as Arc<dyn Tool>)
        .collect())
}

/// Immutable name -> tool mapping
pub struct ToolDispatcher {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolDispatcher {
    /// Register tools in order. A name seen before keeps its first owner.
    pub fn new(candidates: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut seen = HashSet::new();
        let mut tools = Vec::new();
        for tool in candidates {
            if seen.insert(tool.name().to_string()) {
                tools.push(tool);
            } else {
                tracing::warn!(tool = %tool.name(), "Skipping duplicate tool name");
            }
        }
        Self { tools }
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Run the named tool. Unknown names are a soft failure.
    pub async fn invoke(&self, call: &ToolCallRequest) -> Result<ToolOutput, ToolError> {
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.tool_name) else {
            tracing::warn!(tool = %call.tool_name, "Model requested unknown tool");
            return Ok(ToolOutput::unknown_tool(&call.tool_name));
        };

        let start = std::time::Instant::now();
        let result = tool.run(call.arguments.clone()).await;
        match &result {
            Ok(output) => tracing::debug!(
                tool = %call.tool_name,
                success = output.success,
                duration_ms = %start.elapsed().as_millis(),
                "Tool finished"
            ),
            Err(e) => tracing::warn!(
                tool = %call.tool_name,
                error = %e,
                duration_ms = %start.elapsed().as_millis(),
                "Tool failed"
            ),
        }
        result
    }
}
