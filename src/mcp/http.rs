//! Streamable HTTP transport: every JSON-RPC message is a POST; the server
//! answers with plain JSON or a short SSE stream.

use super::{parse_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use super::{McpError, McpResult, McpTransport};
use crate::config::HttpConfig;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const SESSION_HEADER: &str = "mcp-session-id";

pub struct HttpTransport {
    client: Client,
    url: String,
    session_id: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig, timeout: Duration) -> McpResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| McpError::Transport(format!("Invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| McpError::Transport(format!("Invalid header value for {name}: {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            session_id: Mutex::new(None),
        })
    }

    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn post(&self, body: &impl Serialize) -> McpResult<Response> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder.send().await?;
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self
                .session_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }
}

/// First response in an SSE reply that answers `id`
async fn response_from_events(response: Response, id: u64) -> McpResult<JsonRpcResponse> {
    let mut events = std::pin::pin!(response.bytes_stream().eventsource());
    while let Some(event) = events.next().await {
        let event = event.map_err(|e| McpError::Transport(e.to_string()))?;
        if event.data.trim().is_empty() {
            continue;
        }
        if let Some(resp) = parse_response(&event.data)? {
            if resp.id == id {
                return Ok(resp);
            }
        }
    }
    Err(McpError::Disconnected)
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let response = self.post(&request).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_stream {
            response_from_events(response, request.id).await
        } else {
            let body = response.text().await?;
            parse_response(&body)?.ok_or_else(|| {
                McpError::Protocol(format!("Expected a response to {}", request.method))
            })
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        self.post(&notification).await?;
        Ok(())
    }
}
