//! Pure routing function.
//!
//! [`route`] decides which node runs next from the run state alone.  Rules
//! are evaluated in order; the first that applies wins:
//!
//! | # | Condition | Next |
//! |---|-----------|------|
//! | 1 | `current_graph_step >= max_graph_steps` | `end` |
//! | 2 | last message carries [`TERMINAL_MARKER`] | `end` |
//! | 3 | last message carries [`REPLAN_MARKER`] | `planner` |
//! | 4 | last message requests tool calls | `tools` |
//! | 5 | hybrid mode, active step awaits a human answer, about to execute | `human` |
//! | 6 | [`DEFAULT_EDGES`] by `last_node`, refined by validator verdicts | ... |
//!
//! The function has no side effects: the same `(state, config)` always
//! yields the same node.

use crate::config::{AgentMode, RunConfig};
use crate::llm::types::Verdict;
use crate::retry::RetryPolicy;
use crate::state::{NodeId, RunState, StepKind, StepStatus};

/// Marker a node puts in its message to end the run.
pub const TERMINAL_MARKER: &str = "[[TERMINAL]]";

/// Marker a node puts in its message to request a fresh plan.
pub const REPLAN_MARKER: &str = "[[REQUEST_REPLAN]]";

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

/// Target of a default transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Unconditional transition.
    To(NodeId),
    /// Decided by the plan validator's verdict.
    PlanVerdict,
    /// Decided by the step validator's verdict.
    StepVerdict,
}

/// Default transitions keyed by the last node that ran (`None` = fresh run).
pub const DEFAULT_EDGES: &[(Option<NodeId>, Edge)] = &[
    (None, Edge::To(NodeId::Planner)),
    (Some(NodeId::Planner), Edge::To(NodeId::PlannerValidator)),
    (Some(NodeId::PlannerValidator), Edge::PlanVerdict),
    (Some(NodeId::Executor), Edge::To(NodeId::ExecValidator)),
    (Some(NodeId::Tools), Edge::To(NodeId::Executor)),
    (Some(NodeId::ExecValidator), Edge::StepVerdict),
    (Some(NodeId::Human), Edge::To(NodeId::Executor)),
    (Some(NodeId::End), Edge::To(NodeId::End)),
];

/// Look up the default edge for `last_node`.
///
/// Nodes that never hand control back to the graph directly (adaptive
/// planner reports as planner; summarize and supervisor are out-of-band)
/// restart at the planner.
pub fn default_edge(last_node: Option<NodeId>) -> Edge {
    DEFAULT_EDGES
        .iter()
        .find(|(from, _)| *from == last_node)
        .map_or(Edge::To(NodeId::Planner), |(_, edge)| *edge)
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

/// Whether `content` carries `marker`.
pub fn carries(content: &str, marker: &str) -> bool {
    content.contains(marker)
}

/// Remove routing markers from user-facing text.
pub fn strip_markers(content: &str) -> String {
    content
        .replace(TERMINAL_MARKER, "")
        .replace(REPLAN_MARKER, "")
        .trim()
        .to_owned()
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Decide the next node.
pub fn route(state: &RunState, config: &RunConfig) -> NodeId {
    if state.current_graph_step >= config.max_graph_steps {
        return NodeId::End;
    }

    if let Some(last) = state.last_message() {
        if carries(&last.content, TERMINAL_MARKER) {
            return NodeId::End;
        }
        if carries(&last.content, REPLAN_MARKER) {
            return NodeId::Planner;
        }
        if !last.tool_calls.is_empty() {
            return NodeId::Tools;
        }
    }

    let next = follow(default_edge(state.last_node), state, config);

    if next == NodeId::Executor && needs_human(state, config) {
        return NodeId::Human;
    }

    next
}

fn follow(edge: Edge, state: &RunState, config: &RunConfig) -> NodeId {
    let retry = RetryPolicy::of(state, config);
    let verdict = state.last_message().and_then(|m| m.verdict());

    match edge {
        Edge::To(node) => node,
        Edge::PlanVerdict => match verdict {
            Some(Verdict::Plan {
                validated: true, ..
            }) => NodeId::Executor,
            Some(Verdict::Plan { error: true, .. }) => NodeId::End,
            _ if retry.exhausted() => NodeId::End,
            _ => NodeId::Planner,
        },
        Edge::StepVerdict => match verdict {
            Some(Verdict::Step { is_final: true, .. }) => NodeId::AdaptivePlanner,
            _ if retry.exhausted() => NodeId::End,
            _ => NodeId::Executor,
        },
    }
}

/// A human step needs input until the human has answered it.  Resuming a
/// run moves the step out of `pending`, so tool round trips and retries of
/// the same step do not ask again.
fn needs_human(state: &RunState, config: &RunConfig) -> bool {
    config.agent_mode() == AgentMode::Hybrid
        && state.last_node != Some(NodeId::Human)
        && state.active_step().is_some_and(|s| {
            s.kind == StepKind::HumanInTheLoop
                && s.status == StepStatus::Pending
                && s.result.is_none()
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
