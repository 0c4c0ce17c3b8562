//! Executor node.
//!
//! Runs the active plan step.  The model may answer in text, which completes
//! the step, or request tool calls, which the tool invoker runs before the
//! executor is called again for the same step.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::llm::provider::{Capability, InvokeOptions};
use crate::llm::types::{Message, ToolDefinition};
use crate::nodes::planner::render_plan;
use crate::nodes::{NodeContext, context_block, describe_tools, recover};
use crate::routing::REPLAN_MARKER;
use crate::state::{NodeId, RunState, StateUpdate, Step, StepStatus};

/// Text of the synthesized answer when the graph step budget is spent.
/// Always contains `max-iter-<step>`.
pub fn max_iterations_message(graph_step: u32) -> String {
    format!(
        "Stopped: the run used its whole step budget before finishing (max-iter-{graph_step})."
    )
}

/// Execute the active step.
pub async fn run(state: &RunState, ctx: &NodeContext) -> Result<StateUpdate> {
    if state.current_graph_step >= ctx.config.max_graph_steps {
        warn!(
            graph_step = state.current_graph_step,
            max = ctx.config.max_graph_steps,
            "graph step budget exhausted before execution"
        );
        return Ok(StateUpdate {
            last_node: Some(NodeId::Executor),
            ..StateUpdate::default()
        }
        .message(
            Message::ai(max_iterations_message(state.current_graph_step))
                .from_node(NodeId::Executor),
        ));
    }

    let Some(step) = state.active_step() else {
        warn!(index = state.current_step_index, "no active step, requesting a new plan");
        let message = Message::ai(format!("There is no step to execute. {REPLAN_MARKER}"))
            .from_node(NodeId::Executor)
            .with_error();
        return Ok(StateUpdate::step(NodeId::Executor, state).message(message));
    };

    let tools = ctx.tools.list_tools();
    let mut messages = state
        .recent_messages(ctx.config.short_term_memory_window)
        .to_vec();
    messages.push(Message::human(format!(
        "Carry out step {}: {}",
        step.index + 1,
        step.description
    )));

    let opts = InvokeOptions {
        tools: tools.clone(),
        ..InvokeOptions::with_system(system_prompt(state, step, &tools))
    };

    debug!(step = %step.name, tools = tools.len(), "executing step");
    let mut plan = state.plan.clone();
    let index = state.current_step_index;

    match ctx.invoke(Capability::Execution, &messages, &opts).await {
        Ok(response) if response.wants_tools() => {
            info!(step = %step.name, calls = response.tool_calls.len(), "step requested tools");
            plan.steps[index].status = StepStatus::InProgress;
            let message = Message::ai_tool_calls(response.content, response.tool_calls)
                .from_node(NodeId::Executor)
                .with_usage(response.usage);
            Ok(StateUpdate::step(NodeId::Executor, state)
                .message(message)
                .plan(plan))
        }
        Ok(response) => {
            info!(step = %step.name, "step produced a result");
            plan.steps[index].status = StepStatus::Completed;
            plan.steps[index].result = Some(response.content.clone());
            let message = Message::ai(response.content)
                .from_node(NodeId::Executor)
                .with_usage(response.usage);
            Ok(StateUpdate::step(NodeId::Executor, state)
                .message(message)
                .plan(plan))
        }
        Err(err) => {
            let err = recover(err)?;
            warn!(step = %step.name, error = %err, "step execution failed");
            plan.steps[index].status = StepStatus::Failed;
            let message = Message::ai(format!("Step `{}` failed: {err}", step.name))
                .from_node(NodeId::Executor)
                .with_error();
            Ok(StateUpdate::step(NodeId::Executor, state)
                .message(message)
                .plan(plan))
        }
    }
}

fn system_prompt(state: &RunState, step: &Step, tools: &[ToolDefinition]) -> String {
    format!(
        r#"You execute one step of a plan at a time.

## Objective
{objective}

## Plan
{plan}

## Current Step
{name}: {description}

## Available Tools
{tools}{context}

Call tools when the step needs them. When the step is done, answer with its result in plain text."#,
        objective = state.objective(),
        plan = render_plan(&state.plan),
        name = step.name,
        description = step.description,
        tools = describe_tools(tools),
        context = context_block(state),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::error::AgentError;
    use crate::llm::types::ToolCall;
    use crate::routing::carries;
    use crate::state::{Plan, StepKind};
    use crate::testing::{ScriptedProvider, StaticTools, context_with, context_with_config};
    use std::sync::Arc;

    fn planned_state() -> RunState {
        let mut state = RunState::new(Message::human("what is my balance"));
        state.plan = Plan {
            steps: vec![Step::new(0, "balance", "Look up the balance", StepKind::Tools)],
            summary: String::new(),
        };
        state.last_node = Some(NodeId::PlannerValidator);
        state.current_graph_step = 2;
        state
    }

    #[tokio::test]
    async fn budget_guard_short_circuits() {
        let provider = Arc::new(ScriptedProvider::new());
        let config = RunConfig::default().with_max_graph_steps(3);
        let ctx = context_with_config(provider.clone(), StaticTools::empty(), config);

        let mut state = planned_state();
        state.current_graph_step = 3;
        let update = run(&state, &ctx).await.unwrap();

        assert!(update.appended()[0].content.contains("max-iter-3"));
        assert_eq!(update.last_node, Some(NodeId::Executor));
        assert_eq!(update.current_graph_step, None);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_step_requests_replan() {
        let ctx = context_with(Arc::new(ScriptedProvider::new()), StaticTools::empty());
        let state = RunState::new(Message::human("go"));
        let update = run(&state, &ctx).await.unwrap();

        let message = &update.appended()[0];
        assert!(carries(&message.content, REPLAN_MARKER));
        assert!(message.is_error());
    }

    #[tokio::test]
    async fn tool_calls_mark_step_in_progress() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_tool_calls(vec![ToolCall {
            id: "call-1".into(),
            name: "balance".into(),
            args: serde_json::json!({}),
        }]);
        let ctx = context_with(provider.clone(), StaticTools::echo(&["balance"]));

        let update = run(&planned_state(), &ctx).await.unwrap();
        let plan = update.plan.as_ref().expect("plan");
        assert_eq!(plan.steps[0].status, StepStatus::InProgress);
        assert_eq!(update.appended()[0].tool_calls.len(), 1);
        assert_eq!(update.current_graph_step, Some(3));

        let call = &provider.calls()[0];
        assert_eq!(call.capability, Capability::Execution);
        assert_eq!(call.tools, vec!["balance"]);
    }

    #[tokio::test]
    async fn text_answer_completes_step() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_text("Balance is 12 ETH");
        let ctx = context_with(provider, StaticTools::echo(&["balance"]));

        let update = run(&planned_state(), &ctx).await.unwrap();
        let plan = update.plan.expect("plan");
        assert_eq!(plan.steps[0].status, StepStatus::Completed);
        assert_eq!(plan.steps[0].result.as_deref(), Some("Balance is 12 ETH"));
    }

    #[tokio::test]
    async fn context_window_is_bounded() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_text("ok");
        let config = RunConfig {
            short_term_memory_window: 2,
            ..RunConfig::default()
        };
        let ctx = context_with_config(provider.clone(), StaticTools::empty(), config);

        let mut state = planned_state();
        state.plan.steps[0].kind = StepKind::Message;
        for i in 0..10 {
            state.messages.push(Message::ai(format!("m{i}")));
        }
        run(&state, &ctx).await.unwrap();

        // window plus the step instruction
        assert_eq!(provider.calls()[0].messages.len(), 3);
    }

    #[tokio::test]
    async fn model_failure_is_error_tagged() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error(AgentError::ModelRequestFailed {
            reason: "503".into(),
        });
        let ctx = context_with(provider, StaticTools::empty());

        let update = run(&planned_state(), &ctx).await.unwrap();
        assert!(update.appended()[0].is_error());
        assert_eq!(update.plan.expect("plan").steps[0].status, StepStatus::Failed);
    }
}
