//! Adaptive planner node.
//!
//! Runs after a step is accepted.  Moves on to the next pending step when
//! there is one; otherwise asks the model whether the objective is met and
//! either finishes the run or extends the plan.  Completed steps are never
//! replaced.
//!
//! The node reports itself as the planner so the extended plan goes through
//! plan validation like any other.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::Result;
use crate::llm::provider::{Capability, InvokeOptions, StructuredSchema};
use crate::llm::types::Message;
use crate::nodes::planner::{StepDraft, render_plan, step_schema};
use crate::nodes::{NodeContext, context_block, describe_tools, recover};
use crate::routing::TERMINAL_MARKER;
use crate::state::{NodeId, RunState, StateUpdate};

#[derive(Debug, Clone, Deserialize)]
struct Continuation {
    complete: bool,
    #[serde(default)]
    steps: Vec<StepDraft>,
    #[serde(default)]
    response: String,
}

fn continuation_schema() -> StructuredSchema {
    StructuredSchema {
        name: "continuation",
        schema: json!({
            "type": "object",
            "required": ["complete"],
            "properties": {
                "complete": {"type": "boolean"},
                "response": {"type": "string"},
                "steps": {"type": "array", "items": step_schema()}
            }
        }),
    }
}

/// Advance the plan or finish the run.
pub async fn run(state: &RunState, ctx: &NodeContext) -> Result<StateUpdate> {
    let update = StateUpdate::step(NodeId::Planner, state);

    if let Some(next) = state.plan.next_pending_after(state.current_step_index) {
        let step = &state.plan.steps[next];
        info!(from = state.current_step_index, to = next, step = %step.name, "advancing to next step");
        let message = Message::ai(format!("Moving on to step {}: {}", next + 1, step.name))
            .from_node(NodeId::AdaptivePlanner);
        return Ok(update.message(message).step_index(next));
    }

    let tools = ctx.tools.list_tools();
    let messages = vec![Message::human(format!(
        "Objective:\n{}\n\nPlan so far:\n{}\n\nResults:\n{}{}",
        state.objective(),
        render_plan(&state.plan),
        step_results(state),
        context_block(state),
    ))];
    let opts = InvokeOptions::with_system(format!(
        r#"You decide whether an objective has been reached.
If it has, answer {{"complete": true, "response": "<final answer for the user>"}}.
If not, answer {{"complete": false, "steps": [{{"name": "...", "description": "...", "kind": "message|tools"}}]}} with only the additional steps needed.

## Available Tools
{}"#,
        describe_tools(&tools)
    ));

    match ctx
        .invoke_structured::<Continuation>(Capability::Planning, &messages, &opts, &continuation_schema())
        .await
    {
        Ok((continuation, usage)) if continuation.complete || continuation.steps.is_empty() => {
            info!(complete = continuation.complete, "objective reached, finishing run");
            let message = Message::ai(format!("{}\n\n{TERMINAL_MARKER}", continuation.response))
                .from_node(NodeId::AdaptivePlanner)
                .with_usage(usage);
            Ok(update.message(message))
        }
        Ok((continuation, usage)) => {
            let hitl = ctx.config.human_in_the_loop_enabled;
            let mut plan = state.plan.clone();
            let drafts = continuation.steps;
            let added = drafts.len();
            let first = plan.append(
                drafts
                    .into_iter()
                    .map(|d| d.into_step(0, hitl)),
            );
            info!(added, first, "plan extended");
            let message = Message::ai(format!(
                "Extending the plan with {added} step(s).\n{}",
                render_plan(&plan)
            ))
            .from_node(NodeId::AdaptivePlanner)
            .with_usage(usage);
            Ok(update.message(message).plan(plan).step_index(first))
        }
        Err(err) => {
            let err = recover(err)?;
            warn!(error = %err, "adaptive planning failed");
            let message = Message::ai(format!("Failed to create plan: {err}"))
                .from_node(NodeId::AdaptivePlanner)
                .with_error();
            Ok(update.message(message))
        }
    }
}

fn step_results(state: &RunState) -> String {
    state
        .plan
        .steps
        .iter()
        .filter_map(|s| s.result.as_ref().map(|r| format!("- {}: {r}", s.name)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::carries;
    use crate::state::{Plan, Step, StepKind, StepStatus};
    use crate::testing::{ScriptedProvider, StaticTools, context_with};
    use std::sync::Arc;

    fn state_with_steps(statuses: &[StepStatus], current: usize) -> RunState {
        let mut state = RunState::new(Message::human("research and report"));
        state.plan = Plan {
            steps: statuses
                .iter()
                .enumerate()
                .map(|(i, status)| {
                    let mut step = Step::new(i, format!("s{i}"), format!("step {i}"), StepKind::Message);
                    step.status = *status;
                    if *status == StepStatus::Completed {
                        step.result = Some(format!("result {i}"));
                    }
                    step
                })
                .collect(),
            summary: String::new(),
        };
        state.current_step_index = current;
        state.last_node = Some(NodeId::ExecValidator);
        state
    }

    #[tokio::test]
    async fn advances_without_model_when_steps_remain() {
        let provider = Arc::new(ScriptedProvider::new());
        let ctx = context_with(provider.clone(), StaticTools::empty());

        let state = state_with_steps(&[StepStatus::Completed, StepStatus::Pending], 0);
        let update = run(&state, &ctx).await.unwrap();

        assert_eq!(update.current_step_index, Some(1));
        assert_eq!(update.last_node, Some(NodeId::Planner));
        assert!(update.plan.is_none());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn advances_by_position_when_indices_drift() {
        let provider = Arc::new(ScriptedProvider::new());
        let ctx = context_with(provider, StaticTools::empty());

        let mut state = state_with_steps(&[StepStatus::Completed, StepStatus::Pending], 0);
        state.plan.steps[1].index = 42;
        let update = run(&state, &ctx).await.unwrap();

        assert_eq!(update.current_step_index, Some(1));
    }

    #[tokio::test]
    async fn complete_objective_emits_terminal_answer() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_json(json!({"complete": true, "response": "Here is the report"}));
        let ctx = context_with(provider, StaticTools::empty());

        let state = state_with_steps(&[StepStatus::Completed], 0);
        let update = run(&state, &ctx).await.unwrap();

        let message = &update.appended()[0];
        assert!(message.content.starts_with("Here is the report"));
        assert!(carries(&message.content, TERMINAL_MARKER));
    }

    #[tokio::test]
    async fn extension_appends_and_keeps_completed_steps() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_json(json!({
            "complete": false,
            "steps": [{"name": "verify", "description": "Double check"}]
        }));
        let ctx = context_with(provider, StaticTools::empty());

        let state = state_with_steps(&[StepStatus::Completed, StepStatus::Completed], 1);
        let update = run(&state, &ctx).await.unwrap();

        let plan = update.plan.expect("plan");
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].result.as_deref(), Some("result 0"));
        assert_eq!(plan.steps[2].name, "verify");
        assert_eq!(plan.steps[2].index, 2);
        assert_eq!(update.current_step_index, Some(2));
    }

    #[tokio::test]
    async fn model_failure_reports_failed_plan() {
        let ctx = context_with(Arc::new(ScriptedProvider::unavailable()), StaticTools::empty());
        let state = state_with_steps(&[StepStatus::Completed], 0);
        let update = run(&state, &ctx).await.unwrap();

        let message = &update.appended()[0];
        assert!(message.is_error());
        assert!(message.content.starts_with("Failed to create plan"));
        assert_eq!(update.last_node, Some(NodeId::Planner));
    }
}
