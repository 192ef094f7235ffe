//! Newline-delimited JSON-RPC over a child process's stdin/stdout

use super::{parse_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use super::{McpError, McpResult, McpTransport};
use crate::config::StdioConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

pub struct StdioTransport {
    name: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: PendingMap,
    /// Set under the pending lock once stdout closes
    closed: Arc<AtomicBool>,
    timeout: Duration,
    reader: JoinHandle<()>,
    // Held for kill_on_drop
    _child: Child,
}

impl StdioTransport {
    /// Spawn the provider process and start routing its responses
    pub fn spawn(name: &str, config: &StdioConfig, timeout: Duration) -> McpResult<Self> {
        tracing::info!(provider = name, command = %config.command, args = ?config.args, "Starting MCP server process");

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| McpError::Spawn {
            command: config.command.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("Failed to capture stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            let provider = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(provider = %provider, "{line}");
                }
            });
        }

        let pending: PendingMap = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_responses(
            name.to_string(),
            stdout,
            pending.clone(),
            closed.clone(),
        ));

        Ok(Self {
            name: name.to_string(),
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            closed,
            timeout,
            reader,
            _child: child,
        })
    }

    async fn write_line(&self, message: &impl Serialize) -> McpResult<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(format!("Failed to write: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("Failed to flush: {e}")))
    }
}

fn lock_pending(
    pending: &PendingMap,
) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<JsonRpcResponse>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_responses(
    provider: String,
    stdout: ChildStdout,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_response(line) {
                    Ok(Some(response)) => {
                        let sender = lock_pending(&pending).remove(&response.id);
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => {
                                tracing::debug!(provider = %provider, id = response.id, "Dropping response with no waiter");
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(provider = %provider, "Ignoring server-initiated message");
                    }
                    Err(e) => {
                        tracing::warn!(provider = %provider, error = %e, "Unparseable line from MCP server");
                    }
                }
            }
            Ok(None) => {
                tracing::warn!(provider = %provider, "MCP server closed stdout");
                break;
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "Failed to read from MCP server");
                break;
            }
        }
    }
    // Waiters observe a closed channel; later requests see the flag
    let mut pending = lock_pending(&pending);
    closed.store(true, Ordering::SeqCst);
    pending.clear();
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock_pending(&self.pending);
            if self.closed.load(Ordering::SeqCst) {
                return Err(McpError::Disconnected);
            }
            pending.insert(id, tx);
        }
        if let Err(e) = self.write_line(&request).await {
            lock_pending(&self.pending).remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::Disconnected),
            Err(_) => {
                lock_pending(&self.pending).remove(&id);
                tracing::warn!(provider = %self.name, method = %request.method, "MCP request timed out");
                Err(McpError::Timeout(self.timeout))
            }
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        self.write_line(&notification).await
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
