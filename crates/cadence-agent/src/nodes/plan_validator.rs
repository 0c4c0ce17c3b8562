//! Plan validator node.
//!
//! Checks the plan structurally, then asks a model whether the plan actually
//! serves the objective.  If no validation model is available the structural
//! verdict stands and the run continues.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::Result;
use crate::llm::provider::{Capability, InvokeOptions, StructuredSchema};
use crate::llm::types::{Message, Verdict};
use crate::nodes::planner::render_plan;
use crate::nodes::{NodeContext, recover};
use crate::retry::RetryPolicy;
use crate::state::{NodeId, Plan, RunState, StateUpdate, StepKind};

/// The model's judgement of a plan.
#[derive(Debug, Clone, Deserialize)]
struct PlanJudgement {
    validated: bool,
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: String,
}

fn judgement_schema() -> StructuredSchema {
    StructuredSchema {
        name: "plan_verdict",
        schema: json!({
            "type": "object",
            "required": ["validated"],
            "properties": {
                "validated": {"type": "boolean"},
                "error": {"type": "boolean"},
                "reason": {"type": "string"}
            }
        }),
    }
}

const SYSTEM_PROMPT: &str = r#"You review plans. Decide whether the plan is a sensible, complete way to reach the objective.
Respond with JSON only: {"validated": true|false, "error": true|false, "reason": "..."}
Set "error" only when the objective cannot be pursued at all (for example it is harmful or impossible)."#;

/// Problems that make a plan unusable regardless of what a model thinks.
pub fn structural_issues(plan: &Plan, human_in_the_loop: bool, tools_available: bool) -> Vec<String> {
    if plan.is_empty() {
        return vec!["plan has no steps".to_owned()];
    }

    let mut issues = Vec::new();
    for (position, step) in plan.steps.iter().enumerate() {
        if step.index != position {
            issues.push(format!("step `{}` has index {} at position {position}", step.name, step.index));
        }
        if step.kind == StepKind::HumanInTheLoop && !human_in_the_loop {
            issues.push(format!("step `{}` needs human input but hybrid mode is off", step.name));
        }
        if step.kind == StepKind::Tools && !tools_available {
            issues.push(format!("step `{}` needs tools but none are available", step.name));
        }
    }
    issues
}

/// Validate the current plan.
pub async fn run(state: &RunState, ctx: &NodeContext) -> Result<StateUpdate> {
    let retry = RetryPolicy::of(state, &ctx.config);
    let issues = structural_issues(
        &state.plan,
        ctx.config.human_in_the_loop_enabled,
        !ctx.tools.list_tools().is_empty(),
    );

    if !issues.is_empty() {
        let reason = issues.join("; ");
        info!(%reason, retry_count = retry.after_failure(), "plan rejected structurally");
        return Ok(verdict_update(state, false, false, reason, retry, false));
    }

    let messages = vec![Message::human(format!(
        "Objective:\n{}\n\nPlan:\n{}",
        state.objective(),
        render_plan(&state.plan)
    ))];
    let opts = InvokeOptions::with_system(SYSTEM_PROMPT);

    match ctx
        .invoke_structured::<PlanJudgement>(Capability::Validation, &messages, &opts, &judgement_schema())
        .await
    {
        Ok((judgement, _usage)) => {
            info!(
                validated = judgement.validated,
                error = judgement.error,
                reason = %judgement.reason,
                "plan judged"
            );
            Ok(verdict_update(
                state,
                judgement.validated,
                judgement.error,
                judgement.reason,
                retry,
                false,
            ))
        }
        Err(err) => {
            let err = recover(err)?;
            warn!(error = %err, "plan validation model failed, keeping structural verdict");
            Ok(verdict_update(
                state,
                true,
                false,
                format!("structural checks passed; model validation unavailable: {err}"),
                retry,
                true,
            ))
        }
    }
}

fn verdict_update(
    state: &RunState,
    validated: bool,
    error: bool,
    reason: String,
    retry: RetryPolicy,
    degraded: bool,
) -> StateUpdate {
    let content = if validated {
        "Plan validated.".to_owned()
    } else {
        format!("Plan rejected: {reason}")
    };

    let mut message = Message::ai(content)
        .from_node(NodeId::PlannerValidator)
        .with_verdict(Verdict::Plan {
            validated,
            error,
            reason,
        });
    if degraded {
        message = message.with_error();
    }

    let retry_count = match (validated, error) {
        (true, _) => retry.after_success(),
        (false, true) => retry.count,
        (false, false) => retry.after_failure(),
    };

    StateUpdate::step(NodeId::PlannerValidator, state)
        .message(message)
        .retry_count(retry_count)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Step;
    use crate::testing::{ScriptedProvider, StaticTools, context_with};
    use std::sync::Arc;

    fn state_with(plan: Plan) -> RunState {
        let mut state = RunState::new(Message::human("swap tokens"));
        state.plan = plan;
        state.last_node = Some(NodeId::Planner);
        state
    }

    fn one_step(kind: StepKind) -> Plan {
        Plan {
            steps: vec![Step::new(0, "only", "do it", kind)],
            summary: String::new(),
        }
    }

    fn plan_verdict(update: &StateUpdate) -> Verdict {
        update.appended()[0].verdict().cloned().expect("verdict")
    }

    #[test]
    fn empty_plan_is_structurally_invalid() {
        assert_eq!(structural_issues(&Plan::empty(), false, true).len(), 1);
        assert!(structural_issues(&one_step(StepKind::Message), false, false).is_empty());
        assert_eq!(structural_issues(&one_step(StepKind::Tools), false, false).len(), 1);
        assert_eq!(
            structural_issues(&one_step(StepKind::HumanInTheLoop), false, true).len(),
            1
        );
    }

    #[tokio::test]
    async fn structural_rejection_skips_model_and_counts_retry() {
        let provider = Arc::new(ScriptedProvider::new());
        let ctx = context_with(provider.clone(), StaticTools::empty());

        let update = run(&state_with(Plan::empty()), &ctx).await.unwrap();
        assert!(provider.calls().is_empty());
        assert!(matches!(plan_verdict(&update), Verdict::Plan { validated: false, error: false, .. }));
        assert_eq!(update.retry_count, Some(1));
        assert_eq!(update.last_node, Some(NodeId::PlannerValidator));
    }

    #[tokio::test]
    async fn model_approval_resets_retries() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_json(json!({"validated": true, "error": false, "reason": "fine"}));
        let ctx = context_with(provider, StaticTools::empty());

        let mut state = state_with(one_step(StepKind::Message));
        state.retry_count = 3;
        let update = run(&state, &ctx).await.unwrap();
        assert!(matches!(plan_verdict(&update), Verdict::Plan { validated: true, .. }));
        assert_eq!(update.retry_count, Some(0));
        assert!(!update.appended()[0].is_error());
    }

    #[tokio::test]
    async fn model_error_verdict_keeps_retry_count() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_json(json!({"validated": false, "error": true, "reason": "impossible"}));
        let ctx = context_with(provider, StaticTools::empty());

        let mut state = state_with(one_step(StepKind::Message));
        state.retry_count = 2;
        let update = run(&state, &ctx).await.unwrap();
        assert!(matches!(plan_verdict(&update), Verdict::Plan { error: true, .. }));
        assert_eq!(update.retry_count, Some(2));
    }

    #[tokio::test]
    async fn unavailable_model_keeps_structural_verdict() {
        let ctx = context_with(Arc::new(ScriptedProvider::unavailable()), StaticTools::empty());
        let update = run(&state_with(one_step(StepKind::Message)), &ctx).await.unwrap();

        let message = &update.appended()[0];
        assert!(message.is_error());
        assert!(matches!(
            message.verdict(),
            Some(Verdict::Plan { validated: true, error: false, .. })
        ));
    }
}
