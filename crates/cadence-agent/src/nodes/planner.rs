//! Planner node.
//!
//! Decomposes the run's objective into an ordered list of steps.  When the
//! previous plan was rejected by the plan validator, the planner is asked to
//! revise it and is told why it was rejected.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::Result;
use crate::llm::provider::{Capability, InvokeOptions, StructuredSchema};
use crate::llm::types::{Message, ToolDefinition, Verdict};
use crate::nodes::{NodeContext, context_block, describe_tools, recover};
use crate::state::{NodeId, Plan, RunState, StateUpdate, Step, StepKind};

// ---------------------------------------------------------------------------
// Structured output
// ---------------------------------------------------------------------------

/// A plan as proposed by the model, before indices and statuses are assigned.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanDraft {
    pub steps: Vec<StepDraft>,
    #[serde(default)]
    pub summary: String,
}

/// One proposed step.
#[derive(Debug, Clone, Deserialize)]
pub struct StepDraft {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub kind: StepKind,
}

impl StepDraft {
    /// Turn the draft into a pending step.  Human-in-the-loop steps are
    /// downgraded to plain message steps when hybrid mode is off.
    pub fn into_step(self, index: usize, human_in_the_loop: bool) -> Step {
        let kind = match self.kind {
            StepKind::HumanInTheLoop if !human_in_the_loop => StepKind::Message,
            kind => kind,
        };
        Step::new(index, self.name, self.description, kind)
    }
}

impl PlanDraft {
    pub fn into_plan(self, human_in_the_loop: bool) -> Plan {
        Plan {
            steps: self
                .steps
                .into_iter()
                .enumerate()
                .map(|(i, s)| s.into_step(i, human_in_the_loop))
                .collect(),
            summary: self.summary,
        }
    }
}

/// JSON Schema for a single step, shared with the adaptive planner.
pub fn step_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["name", "description"],
        "properties": {
            "name": {"type": "string", "minLength": 1},
            "description": {"type": "string"},
            "kind": {"type": "string", "enum": ["message", "tools", "human_in_the_loop"]}
        }
    })
}

pub fn plan_schema() -> StructuredSchema {
    StructuredSchema {
        name: "plan",
        schema: json!({
            "type": "object",
            "required": ["steps"],
            "properties": {
                "summary": {"type": "string"},
                "steps": {"type": "array", "items": step_schema()}
            }
        }),
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Produce a fresh plan, or revise a rejected one.
pub async fn run(state: &RunState, ctx: &NodeContext) -> Result<StateUpdate> {
    let tools = ctx.tools.list_tools();
    let hitl = ctx.config.human_in_the_loop_enabled;

    let instruction = match rejection_reason(state) {
        Some(reason) => revision_prompt(state, reason),
        None => fresh_prompt(state),
    };
    let revision = state.last_node == Some(NodeId::PlannerValidator);

    let mut messages = state
        .recent_messages(ctx.config.short_term_memory_window)
        .to_vec();
    messages.push(Message::human(instruction));

    let opts = InvokeOptions::with_system(system_prompt(&tools, hitl));
    let result = ctx
        .invoke_structured::<PlanDraft>(Capability::Planning, &messages, &opts, &plan_schema())
        .await;

    match result {
        Ok((draft, usage)) => {
            let plan = draft.into_plan(hitl);
            info!(
                steps = plan.steps.len(),
                revision,
                summary = %plan.summary,
                "plan generated"
            );
            let message = Message::ai(render_plan(&plan))
                .from_node(NodeId::Planner)
                .with_usage(usage);
            Ok(StateUpdate::step(NodeId::Planner, state)
                .message(message)
                .plan(plan)
                .step_index(0))
        }
        Err(err) => {
            let err = recover(err)?;
            warn!(error = %err, revision, "planning failed, continuing with current plan");
            let message = Message::ai(format!("Planning failed: {err}"))
                .from_node(NodeId::Planner)
                .with_error();
            Ok(StateUpdate::step(NodeId::Planner, state).message(message))
        }
    }
}

/// The validator's reason for rejecting the previous plan, when the planner
/// runs right after a rejection.
fn rejection_reason(state: &RunState) -> Option<&str> {
    if state.last_node != Some(NodeId::PlannerValidator) {
        return None;
    }
    match state.last_message().and_then(|m| m.verdict()) {
        Some(Verdict::Plan { reason, .. }) => Some(reason.as_str()),
        _ => Some("no reason given"),
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn system_prompt(tools: &[ToolDefinition], human_in_the_loop: bool) -> String {
    let kinds = if human_in_the_loop {
        "`message`, `tools` or `human_in_the_loop` (the user must supply input)"
    } else {
        "`message` or `tools`; human input is not available"
    };

    format!(
        r#"You are a task planner. Decompose the user's objective into an ordered list of concrete steps.

## Available Tools
{tools}

## Output Format
Respond with JSON only:
{{"summary": "one sentence strategy", "steps": [{{"name": "short_name", "description": "what to do", "kind": "message"}}]}}

## Rules
- Step kind is {kinds}.
- Use `tools` only for steps that need one of the tools above.
- Keep the plan minimal."#,
        tools = describe_tools(tools),
    )
}

fn fresh_prompt(state: &RunState) -> String {
    format!(
        "Create a plan for this objective:\n\n{}{}",
        state.objective(),
        context_block(state)
    )
}

fn revision_prompt(state: &RunState, reason: &str) -> String {
    format!(
        "Your previous plan was rejected.\n\nRejection reason: {reason}\n\nPrevious plan:\n{}\n\nRevise the plan for this objective:\n\n{}{}",
        render_plan(&state.plan),
        state.objective(),
        context_block(state)
    )
}

/// Human-readable rendering of a plan.
pub fn render_plan(plan: &Plan) -> String {
    if plan.is_empty() {
        return "(empty plan)".to_owned();
    }
    let mut out = String::new();
    if !plan.summary.is_empty() {
        out.push_str(&plan.summary);
        out.push('\n');
    }
    for step in &plan.steps {
        out.push_str(&format!(
            "{}. {} [{:?}]: {}\n",
            step.index + 1,
            step.name,
            step.kind,
            step.description
        ));
    }
    out.trim_end().to_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::testing::{ScriptedProvider, StaticTools, context_with};
    use std::sync::Arc;

    fn plan_json() -> serde_json::Value {
        json!({
            "summary": "check then ask",
            "steps": [
                {"name": "balance", "description": "Check the balance", "kind": "tools"},
                {"name": "confirm", "description": "Ask the user", "kind": "human_in_the_loop"}
            ]
        })
    }

    #[tokio::test]
    async fn fresh_plan_replaces_state_plan() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_json(plan_json());
        let ctx = context_with(provider.clone(), StaticTools::echo(&["balance"]));

        let state = RunState::new(Message::human("check my balance"));
        let update = run(&state, &ctx).await.unwrap();

        let plan = update.plan.expect("plan");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].index, 1);
        assert_eq!(update.current_step_index, Some(0));
        assert_eq!(update.last_node, Some(NodeId::Planner));
        assert_eq!(update.current_graph_step, Some(1));

        let calls = provider.calls();
        assert_eq!(calls[0].capability, Capability::Planning);
        assert!(calls[0].last_content().contains("check my balance"));
    }

    #[tokio::test]
    async fn human_steps_are_coerced_without_hybrid_mode() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_json(plan_json());
        let ctx = context_with(provider, StaticTools::echo(&["balance"]));

        let update = run(&RunState::new(Message::human("go")), &ctx).await.unwrap();
        let plan = update.plan.expect("plan");
        assert_eq!(plan.steps[1].kind, StepKind::Message);
        assert_eq!(plan.steps[0].kind, StepKind::Tools);
    }

    #[tokio::test]
    async fn revision_prompt_carries_rejection_reason() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_json(plan_json());
        let ctx = context_with(provider.clone(), StaticTools::empty());

        let mut state = RunState::new(Message::human("go"));
        state.apply(
            StateUpdate::step(NodeId::PlannerValidator, &state).message(
                Message::ai("rejected")
                    .from_node(NodeId::PlannerValidator)
                    .with_verdict(Verdict::Plan {
                        validated: false,
                        error: false,
                        reason: "step two is vague".into(),
                    }),
            ),
        );

        run(&state, &ctx).await.unwrap();
        let prompt = provider.calls()[0].last_content();
        assert!(prompt.contains("rejected"));
        assert!(prompt.contains("step two is vague"));
    }

    #[tokio::test]
    async fn unavailable_model_yields_error_message() {
        let ctx = context_with(Arc::new(ScriptedProvider::unavailable()), StaticTools::empty());
        let mut state = RunState::new(Message::human("go"));
        state.plan = Plan {
            steps: vec![Step::new(0, "keep", "keep me", StepKind::Message)],
            summary: String::new(),
        };

        let update = run(&state, &ctx).await.unwrap();
        assert!(update.plan.is_none());
        assert_eq!(update.last_node, Some(NodeId::Planner));
        assert!(update.appended()[0].is_error());
    }

    #[tokio::test]
    async fn malformed_plan_is_recovered() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_json(json!({"steps": "not a list"}));
        let ctx = context_with(provider, StaticTools::empty());

        let update = run(&RunState::new(Message::human("go")), &ctx).await.unwrap();
        assert!(update.appended()[0].is_error());
    }

    #[tokio::test]
    async fn cancellation_propagates() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error(AgentError::Cancelled {
            thread_id: "t".into(),
        });
        let ctx = context_with(provider, StaticTools::empty());

        let err = run(&RunState::new(Message::human("go")), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled { .. }));
    }

    #[test]
    fn render_plan_lists_steps() {
        let plan = Plan {
            steps: vec![Step::new(0, "a", "do a", StepKind::Message)],
            summary: "s".into(),
        };
        assert_eq!(render_plan(&plan), "s\n1. a [Message]: do a");
    }
}
