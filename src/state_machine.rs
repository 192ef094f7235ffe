//! Turn state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions: the
//! machine only describes effects, `runtime::executor` performs them.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::TurnEvent;
pub use state::{FailureReason, TurnContext, TurnState};
pub use transition::{
    begin, transition, unanswered_calls, TransitionError, TransitionResult,
    INTERRUPTED_TOOL_RESULT,
};
