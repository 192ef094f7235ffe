//! Tool backed by an MCP provider

use super::{Tool, ToolError, ToolOutput};
use crate::mcp::{McpClient, ToolInfo};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct RemoteTool {
    client: Arc<McpClient>,
    info: ToolInfo,
}

impl RemoteTool {
    pub fn new(client: Arc<McpClient>, info: ToolInfo) -> Self {
        Self { client, info }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> String {
        self.info.description.clone().unwrap_or_default()
    }

    fn input_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn run(&self, input: Value) -> Result<ToolOutput, ToolError> {
        // MCP expects an argument object
        let arguments = if input.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            input
        };

        let result = self
            .client
            .call_tool(&self.info.name, arguments)
            .await
            .map_err(|source| ToolError::Provider {
                provider: self.client.provider().to_string(),
                source,
            })?;

        if result.is_error {
            Ok(ToolOutput::error(result.text()))
        } else {
            Ok(ToolOutput::success(result.text()))
        }
    }
}
