//! Per-turn event stream

use serde::Serialize;
use tokio::sync::mpsc;

/// Notification delivered to the client while a turn runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Text fragment from the model
    #[serde(rename = "content")]
    ContentDelta { content: String },
    ToolStart { tool: String },
    ToolEnd { tool: String },
    /// Terminal failure; nothing follows it
    Error { content: String },
}

/// Sending half of a turn's event channel.
///
/// Sends never block and are dropped silently once the consumer is gone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl EventSink {
    pub fn send(&self, event: ExecutionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event consumer gone, dropping event");
        }
    }

    pub fn delta(&self, content: &str) {
        self.send(ExecutionEvent::ContentDelta {
            content: content.to_string(),
        });
    }
}

/// Create a FIFO event channel for one turn
pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}
