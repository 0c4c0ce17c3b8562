//! Human-in-the-loop node.
//!
//! Asks for input on the active step.  The engine suspends the run after
//! this node; the answer arrives through `Engine::resume`.

use tracing::info;

use crate::llm::types::Message;
use crate::state::{NodeId, RunState, StateUpdate};

/// Request human input for the active step.
pub fn run(state: &RunState) -> StateUpdate {
    let prompt = match state.active_step() {
        Some(step) => format!("Input needed for step `{}`: {}", step.name, step.description),
        None => "Input needed to continue.".to_owned(),
    };
    info!(step = state.current_step_index, "waiting for human input");

    StateUpdate::step(NodeId::Human, state).message(Message::ai(prompt).from_node(NodeId::Human))
}
