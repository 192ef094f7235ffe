//! Effects produced by state transitions

use crate::db::{Message, ToolCallRequest};
use crate::runtime::ExecutionEvent;

/// Effects to be executed after state transition, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append to the in-memory history of the turn
    AppendMessage(Message),

    /// Write the current history as the thread's next checkpoint
    PersistCheckpoint,

    /// Send the history to the model
    RequestModel,

    /// Run one tool call
    InvokeTool(ToolCallRequest),

    /// Notify the client
    Emit(ExecutionEvent),
}

impl Effect {
    pub fn tool_start(call: &ToolCallRequest) -> Self {
        Effect::Emit(ExecutionEvent::ToolStart {
            tool: call.tool_name.clone(),
        })
    }

    pub fn tool_end(call: &ToolCallRequest) -> Self {
        Effect::Emit(ExecutionEvent::ToolEnd {
            tool: call.tool_name.clone(),
        })
    }
}
