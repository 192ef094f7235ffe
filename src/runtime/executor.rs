//! Turn executor
//!
//! Drives the pure state machine for one turn, performing the effects it
//! returns and feeding the outcome of each model or tool call back in.

use super::events::{EventSink, ExecutionEvent};
use super::traits::{Storage, ToolExecutor};
use crate::db::{DbError, Message, ToolCallRequest};
use crate::llm::{LlmRequest, LlmService};
use crate::state_machine::{
    begin, transition, Effect, FailureReason, TransitionError, TurnContext, TurnEvent, TurnState,
};
use crate::title_generator::derive_title;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a turn produced no final answer
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Failed(#[from] FailureReason),
}

/// Runs turns against a storage backend, a model and a tool set
pub struct TurnExecutor<S, T>
where
    S: Storage + 'static,
    T: ToolExecutor + 'static,
{
    storage: Arc<S>,
    llm: Arc<dyn LlmService>,
    tools: Arc<T>,
    system_prompt: Option<String>,
    max_tool_cycles: u32,
}

impl<S, T> TurnExecutor<S, T>
where
    S: Storage + 'static,
    T: ToolExecutor + 'static,
{
    pub fn new(storage: S, llm: Arc<dyn LlmService>, tools: T, max_tool_cycles: u32) -> Self {
        Self {
            storage: Arc::new(storage),
            llm,
            tools: Arc::new(tools),
            system_prompt: None,
            max_tool_cycles,
        }
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Run one turn, reporting any failure as the single terminal
    /// `Error` event. The sink is dropped on return, closing the stream.
    pub async fn execute(
        &self,
        thread_id: &str,
        user_text: &str,
        events: EventSink,
        cancel: CancellationToken,
    ) {
        let start = std::time::Instant::now();
        match self.run_turn(thread_id, user_text, &events, &cancel).await {
            Ok(step) => tracing::info!(
                thread_id = %thread_id,
                step,
                duration_ms = %start.elapsed().as_millis(),
                "Turn complete"
            ),
            Err(e) => {
                tracing::warn!(thread_id = %thread_id, error = %e, "Turn failed");
                events.send(ExecutionEvent::Error {
                    content: e.to_string(),
                });
            }
        }
    }

    /// Returns the last step written
    async fn run_turn(
        &self,
        thread_id: &str,
        user_text: &str,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<i64, TurnError> {
        if cancel.is_cancelled() {
            return Err(FailureReason::Cancelled.into());
        }

        let context = TurnContext::new(thread_id, self.max_tool_cycles);
        let (mut step, mut history) = match self.storage.latest_checkpoint(thread_id).await? {
            Some(checkpoint) => (checkpoint.step, checkpoint.messages),
            None => (0, Vec::new()),
        };

        if !self.storage.has_title(thread_id).await? {
            let title = derive_title(user_text);
            tracing::debug!(thread_id = %thread_id, title = %title, "Naming thread");
            self.storage.upsert_title(thread_id, &title).await?;
        }

        let started = begin(&history, user_text);
        let mut state = started.new_state;
        let mut effects = started.effects;

        loop {
            let mut pending = None;
            for effect in effects {
                match effect {
                    Effect::AppendMessage(message) => history.push(message),
                    Effect::PersistCheckpoint => {
                        step += 1;
                        self.storage
                            .save_checkpoint(thread_id, step, &history)
                            .await?;
                        tracing::debug!(thread_id = %thread_id, step, "Checkpoint saved");
                    }
                    Effect::RequestModel => {
                        pending = Some(self.request_model(&history, events, cancel).await);
                    }
                    Effect::InvokeTool(call) => {
                        pending = Some(self.invoke_tool(&call, cancel).await);
                    }
                    Effect::Emit(event) => events.send(event),
                }
            }

            if state.is_terminal() {
                return match state {
                    TurnState::Failed { reason } => Err(reason.into()),
                    _ => Ok(step),
                };
            }

            let event = pending.ok_or_else(|| {
                TransitionError::InvalidTransition(format!("nothing pending in {state:?}"))
            })?;
            let result = transition(&state, &context, event)?;
            state = result.new_state;
            effects = result.effects;
        }
    }

    async fn request_model(
        &self,
        history: &[Message],
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> TurnEvent {
        let request = LlmRequest {
            system: self.system_prompt.clone(),
            messages: history.to_vec(),
            tools: self.tools.definitions(),
            max_tokens: None,
        };
        let on_delta = |delta: &str| events.delta(delta);

        tokio::select! {
            biased;
            () = cancel.cancelled() => TurnEvent::Cancelled,
            result = self.llm.complete(&request, &on_delta) => match result {
                Ok(response) => TurnEvent::ModelReplied(response.output),
                Err(e) => TurnEvent::ModelFailed { message: e.to_string() },
            },
        }
    }

    async fn invoke_tool(&self, call: &ToolCallRequest, cancel: &CancellationToken) -> TurnEvent {
        tokio::select! {
            biased;
            () = cancel.cancelled() => TurnEvent::Cancelled,
            result = self.tools.invoke(call) => match result {
                Ok(output) => TurnEvent::ToolCompleted { call_id: call.id.clone(), output },
                Err(e) => TurnEvent::ToolFailed { call_id: call.id.clone(), message: e.to_string() },
            },
        }
    }
}
