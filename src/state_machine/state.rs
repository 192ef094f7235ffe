//! Turn state types

use crate::db::ToolCallRequest;
use thiserror::Error;

/// Fixed inputs for one turn
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub thread_id: String,
    /// Model responses with tool requests allowed in one turn
    pub max_tool_cycles: u32,
}

impl TurnContext {
    pub fn new(thread_id: impl Into<String>, max_tool_cycles: u32) -> Self {
        Self {
            thread_id: thread_id.into(),
            max_tool_cycles,
        }
    }
}

/// Where a turn is in the model/tool loop
#[derive(Debug, Clone, PartialEq)]
pub enum TurnState {
    /// Waiting on the model. `cycle` counts tool batches already run.
    Responding { cycle: u32 },
    /// Running the tool calls of one model response, in order
    Dispatching {
        cycle: u32,
        current: ToolCallRequest,
        remaining: Vec<ToolCallRequest>,
    },
    Done,
    Failed { reason: FailureReason },
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Done | TurnState::Failed { .. })
    }
}

/// Why a turn ended without an answer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("Model request failed: {0}")]
    Model(String),
    #[error("Tool {tool} failed: {message}")]
    Tool { tool: String, message: String },
    #[error("Tool loop exceeded {limit} cycles")]
    ToolLoopExceeded { limit: u32 },
    #[error("Turn cancelled")]
    Cancelled,
}
