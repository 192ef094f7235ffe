//! Pure state transition function

use super::{Effect, FailureReason, TurnContext, TurnEvent, TurnState};
use crate::db::{Message, Role, ToolCallRequest};
use crate::llm::ModelOutput;
use std::collections::HashSet;
use thiserror::Error;

/// Tool-role answer substituted for calls a previous turn never finished
pub const INTERRUPTED_TOOL_RESULT: &str = "[Tool execution interrupted before completion]";

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TurnState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: TurnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Calls of the last assistant message that no tool message answered
pub fn unanswered_calls(history: &[Message]) -> Vec<ToolCallRequest> {
    let Some(pos) = history
        .iter()
        .rposition(|m| m.role == Role::Assistant)
    else {
        return vec![];
    };

    let answered: HashSet<&str> = history
        .iter()
        .skip(pos + 1)
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();

    history[pos]
        .tool_calls
        .iter()
        .filter(|call| !answered.contains(call.id.as_str()))
        .cloned()
        .collect()
}

/// Start a turn on top of `history`.
///
/// Unanswered tool calls left by an interrupted turn are closed with a
/// synthetic result first, so the model always sees every call answered.
pub fn begin(history: &[Message], user_text: &str) -> TransitionResult {
    let repairs = unanswered_calls(history)
        .into_iter()
        .map(|call| Effect::AppendMessage(Message::tool(call.id, INTERRUPTED_TOOL_RESULT)));

    TransitionResult::new(TurnState::Responding { cycle: 0 })
        .with_effects(repairs)
        .with_effect(Effect::AppendMessage(Message::user(user_text)))
        .with_effect(Effect::PersistCheckpoint)
        .with_effect(Effect::RequestModel)
}

fn dispatch(cycle: u32, mut calls: Vec<ToolCallRequest>) -> TransitionResult {
    let current = calls.remove(0);
    TransitionResult::new(TurnState::Dispatching {
        cycle,
        current: current.clone(),
        remaining: calls,
    })
    .with_effect(Effect::tool_start(&current))
    .with_effect(Effect::InvokeTool(current))
}

fn fail(reason: FailureReason) -> TransitionResult {
    TransitionResult::new(TurnState::Failed { reason })
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs; all I/O is
/// described by the returned effects.
pub fn transition(
    state: &TurnState,
    context: &TurnContext,
    event: TurnEvent,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Model replies
        // ============================================================
        (TurnState::Responding { .. }, TurnEvent::ModelReplied(ModelOutput::Answer(message))) => {
            Ok(TransitionResult::new(TurnState::Done)
                .with_effect(Effect::AppendMessage(message))
                .with_effect(Effect::PersistCheckpoint))
        }

        (
            TurnState::Responding { cycle },
            TurnEvent::ModelReplied(ModelOutput::ToolRequests { message, calls }),
        ) => {
            if calls.is_empty() {
                return Ok(TransitionResult::new(TurnState::Done)
                    .with_effect(Effect::AppendMessage(message))
                    .with_effect(Effect::PersistCheckpoint));
            }
            if *cycle >= context.max_tool_cycles {
                return Ok(fail(FailureReason::ToolLoopExceeded {
                    limit: context.max_tool_cycles,
                }));
            }

            let next = dispatch(cycle + 1, calls);
            Ok(TransitionResult::new(next.new_state)
                .with_effect(Effect::AppendMessage(message))
                .with_effect(Effect::PersistCheckpoint)
                .with_effects(next.effects))
        }

        (TurnState::Responding { .. }, TurnEvent::ModelFailed { message }) => {
            Ok(fail(FailureReason::Model(message)))
        }

        // ============================================================
        // Tool results
        // ============================================================
        (
            TurnState::Dispatching {
                cycle,
                current,
                remaining,
            },
            TurnEvent::ToolCompleted { call_id, output },
        ) if call_id == current.id => {
            let answered = TransitionResult::new(TurnState::Responding { cycle: *cycle })
                .with_effect(Effect::tool_end(current))
                .with_effect(Effect::AppendMessage(Message::tool(
                    call_id,
                    output.output,
                )));

            if remaining.is_empty() {
                Ok(answered
                    .with_effect(Effect::PersistCheckpoint)
                    .with_effect(Effect::RequestModel))
            } else {
                let next = dispatch(*cycle, remaining.clone());
                Ok(TransitionResult::new(next.new_state)
                    .with_effects(answered.effects)
                    .with_effects(next.effects))
            }
        }

        (TurnState::Dispatching { current, .. }, TurnEvent::ToolFailed { call_id, message })
            if call_id == current.id =>
        {
            Ok(fail(FailureReason::Tool {
                tool: current.tool_name.clone(),
                message,
            }))
        }

        // ============================================================
        // Cancellation
        // ============================================================
        (TurnState::Responding { .. } | TurnState::Dispatching { .. }, TurnEvent::Cancelled) => {
            Ok(fail(FailureReason::Cancelled))
        }

        // ============================================================
        // Everything else
        // ============================================================
        (TurnState::Done | TurnState::Failed { .. }, event) => Err(
            TransitionError::InvalidTransition(format!("turn already finished, got {event:?}")),
        ),

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {state:?}"
        ))),
    }
}
