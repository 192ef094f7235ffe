//! Property-based tests for the turn state machine

use super::*;
use crate::db::{Message, Role, ToolCallRequest};
use crate::llm::ModelOutput;
use crate::tools::ToolOutput;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

// ============================================================================
// Generators
// ============================================================================

fn arb_calls(prefix: &'static str) -> impl Strategy<Value = Vec<ToolCallRequest>> {
    proptest::collection::vec(prop_oneof![Just("web_search"), Just("get_stock_price")], 0..4)
        .prop_map(move |names| {
            names
                .into_iter()
                .enumerate()
                .map(|(i, name)| ToolCallRequest::new(format!("{prefix}{i}"), name, json!({})))
                .collect()
        })
}

fn arb_output() -> impl Strategy<Value = ToolOutput> {
    ("[a-zA-Z0-9 ]{0,20}", any::<bool>()).prop_map(|(text, ok)| {
        if ok {
            ToolOutput::success(text)
        } else {
            ToolOutput::error(text)
        }
    })
}

/// Model script: each entry is one response, the final one is forced to an answer
fn arb_script() -> impl Strategy<Value = Vec<Vec<ToolCallRequest>>> {
    proptest::collection::vec(0usize..4, 0..6).prop_map(|sizes| {
        sizes
            .into_iter()
            .enumerate()
            .map(|(round, n)| {
                (0..n)
                    .map(|i| ToolCallRequest::new(format!("r{round}c{i}"), "web_search", json!({})))
                    .collect()
            })
            .collect()
    })
}

fn arb_event() -> impl Strategy<Value = TurnEvent> {
    prop_oneof![
        arb_calls("x").prop_map(|calls| TurnEvent::ModelReplied(ModelOutput::from_message(
            Message::assistant("", calls)
        ))),
        "[a-z]{1,10}".prop_map(|message| TurnEvent::ModelFailed { message }),
        ("x[0-3]", arb_output())
            .prop_map(|(call_id, output)| TurnEvent::ToolCompleted { call_id, output }),
        "x[0-3]".prop_map(|call_id| TurnEvent::ToolFailed {
            call_id,
            message: "boom".into(),
        }),
        Just(TurnEvent::Cancelled),
    ]
}

// ============================================================================
// Driver
// ============================================================================

/// Applies a result's effects to a history, returning the model/tool requests seen
fn apply(history: &mut Vec<Message>, effects: Vec<Effect>) -> (usize, Vec<ToolCallRequest>) {
    let mut model_requests = 0;
    let mut invoked = vec![];
    for effect in effects {
        match effect {
            Effect::AppendMessage(m) => history.push(m),
            Effect::RequestModel => model_requests += 1,
            Effect::InvokeTool(call) => invoked.push(call),
            Effect::PersistCheckpoint | Effect::Emit(_) => {}
        }
    }
    (model_requests, invoked)
}

/// Runs a full turn where every tool succeeds; returns the history and final state
fn run_turn(
    prior: Vec<Message>,
    script: &[Vec<ToolCallRequest>],
    ctx: &TurnContext,
) -> (Vec<Message>, TurnState) {
    let mut history = prior;
    let started = begin(&history, "go");
    let mut state = started.new_state;
    let (mut pending_model, mut pending_tools) = apply(&mut history, started.effects);
    let mut responses = script.iter();

    while !state.is_terminal() {
        let event = if let Some(call) = pending_tools.pop() {
            TurnEvent::ToolCompleted {
                call_id: call.id,
                output: ToolOutput::success("ok"),
            }
        } else {
            assert_eq!(pending_model, 1, "stalled in {state:?}");
            let calls = responses.next().cloned().unwrap_or_default();
            TurnEvent::ModelReplied(ModelOutput::from_message(Message::assistant(
                "reply", calls,
            )))
        };
        let result = transition(&state, ctx, event).expect("driver only sends valid events");
        state = result.new_state;
        (pending_model, pending_tools) = apply(&mut history, result.effects);
    }
    (history, state)
}

fn every_call_answered_once(history: &[Message]) -> bool {
    let mut answered = HashSet::new();
    for (i, message) in history.iter().enumerate() {
        if message.role == Role::Tool {
            let Some(id) = message.tool_call_id.as_deref() else {
                return false;
            };
            if !answered.insert(id.to_string()) {
                return false;
            }
        }
        if message.role == Role::Assistant && !message.tool_calls.is_empty() {
            let ids: Vec<_> = message.tool_calls.iter().map(|c| c.id.as_str()).collect();
            let following: Vec<_> = history
                .iter()
                .skip(i + 1)
                .take(ids.len())
                .filter_map(|m| m.tool_call_id.as_deref())
                .collect();
            if following != ids {
                return false;
            }
        }
    }
    true
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Tool results directly follow their request, in request order
    #[test]
    fn prop_completed_turn_pairs_calls(script in arb_script()) {
        let ctx = TurnContext::new("t", 10);
        let (history, state) = run_turn(vec![], &script, &ctx);

        prop_assert_eq!(state, TurnState::Done);
        prop_assert!(every_call_answered_once(&history), "{:?}", history);
        prop_assert_eq!(history.last().map(|m| m.role), Some(Role::Assistant));
    }

    // The number of tool batches never exceeds the configured bound
    #[test]
    fn prop_tool_cycles_bounded(script in arb_script(), limit in 0u32..4) {
        let ctx = TurnContext::new("t", limit);
        let (history, state) = run_turn(vec![], &script, &ctx);

        let batches = history
            .iter()
            .filter(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
            .count();
        prop_assert!(batches <= limit as usize);

        let wanted = script.iter().take_while(|calls| !calls.is_empty()).count();
        if wanted > limit as usize {
            prop_assert_eq!(
                state,
                TurnState::Failed { reason: FailureReason::ToolLoopExceeded { limit } }
            );
        }
    }

    // A turn begun on interrupted history still leaves every call answered
    #[test]
    fn prop_begin_repairs_history(calls in arb_calls("old"), answered in 0usize..4) {
        let mut prior = vec![Message::user("first"), Message::assistant("", calls.clone())];
        for call in calls.iter().take(answered) {
            prior.push(Message::tool(call.id.clone(), "done"));
        }

        let (history, _) = run_turn(prior, &[], &TurnContext::new("t", 3));
        prop_assert!(every_call_answered_once(&history), "{:?}", history);
    }

    // Failed and done turns accept nothing further
    #[test]
    fn prop_terminal_states_reject_events(event in arb_event()) {
        let ctx = TurnContext::new("t", 3);
        prop_assert!(transition(&TurnState::Done, &ctx, event.clone()).is_err());
        let failed = TurnState::Failed { reason: FailureReason::Cancelled };
        prop_assert!(transition(&failed, &ctx, event).is_err());
    }

    // Transitions into a failed state never write history
    #[test]
    fn prop_failure_has_no_effects(events in proptest::collection::vec(arb_event(), 0..12)) {
        let ctx = TurnContext::new("t", 2);
        let mut state = TurnState::Responding { cycle: 0 };
        for event in events {
            if let Ok(result) = transition(&state, &ctx, event) {
                if matches!(result.new_state, TurnState::Failed { .. }) {
                    prop_assert!(result.effects.is_empty());
                }
                state = result.new_state;
            }
        }
    }
}
