//! Terminal node.
//!
//! Composes the run's final answer and resets the plan and counters so the
//! state can seed a follow-up run on the same thread.

use tracing::info;

use crate::config::RunConfig;
use crate::llm::types::{Message, Role, Verdict};
use crate::nodes::executor::max_iterations_message;
use crate::routing::strip_markers;
use crate::state::{NodeId, Plan, RunState, StateUpdate};

/// Finish the run.
///
/// Does not count as a graph step, so a run ended by its budget still
/// reports `current_graph_step <= max_graph_steps`.
pub fn end_graph(state: &RunState, config: &RunConfig) -> StateUpdate {
    let budget_spent = state.current_graph_step >= config.max_graph_steps;
    let last_ai = state.messages.iter().rev().find(|m| m.role == Role::Ai);

    let content = match last_ai {
        _ if budget_spent => max_iterations_message(state.current_graph_step),
        Some(message) => strip_markers(&message.content),
        None => String::new(),
    };

    let failed = budget_spent || last_ai.is_some_and(ended_badly);

    let mut message = Message::ai(content)
        .from_node(NodeId::End)
        .finalized(config.agent_mode());
    if failed {
        message = message.with_error();
    }

    info!(
        graph_step = state.current_graph_step,
        error = failed,
        "run finished"
    );

    StateUpdate {
        last_node: Some(NodeId::End),
        ..StateUpdate::default()
    }
    .message(message)
    .plan(Plan::empty())
    .step_index(0)
    .retry_count(0)
}

fn ended_badly(message: &Message) -> bool {
    message.is_error()
        || matches!(
            message.verdict(),
            Some(Verdict::Plan {
                validated: false,
                ..
            }) | Some(Verdict::Step {
                is_final: false,
                ..
            })
        )
}
