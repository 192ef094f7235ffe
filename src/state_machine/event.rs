//! Events fed into the turn state machine

use crate::llm::ModelOutput;
use crate::tools::ToolOutput;

/// Outcome of the pending operation, reported by the executor
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    ModelReplied(ModelOutput),
    ModelFailed { message: String },
    ToolCompleted { call_id: String, output: ToolOutput },
    ToolFailed { call_id: String, message: String },
    Cancelled,
}
