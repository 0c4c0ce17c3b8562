//! Step validator node.
//!
//! Judges whether the executor's latest output completes the active step.

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::Result;
use crate::llm::provider::{Capability, InvokeOptions, StructuredSchema};
use crate::llm::types::{Message, Verdict};
use crate::nodes::{NodeContext, recover};
use crate::retry::RetryPolicy;
use crate::state::{NodeId, RunState, StateUpdate, StepStatus};

#[derive(Debug, Clone, Deserialize)]
struct StepJudgement {
    #[serde(rename = "final")]
    is_final: bool,
    #[serde(default)]
    reason: String,
}

fn judgement_schema() -> StructuredSchema {
    StructuredSchema {
        name: "step_verdict",
        schema: json!({
            "type": "object",
            "required": ["final"],
            "properties": {
                "final": {"type": "boolean"},
                "reason": {"type": "string"}
            }
        }),
    }
}

const SYSTEM_PROMPT: &str = r#"You check whether a step of a plan has been carried out.
Respond with JSON only: {"final": true|false, "reason": "..."}"#;

/// Judge the active step.
pub async fn run(state: &RunState, ctx: &NodeContext) -> Result<StateUpdate> {
    let retry = RetryPolicy::of(state, &ctx.config);

    if state.last_message().is_some_and(Message::is_error) {
        info!(retry_count = retry.after_failure(), "executor reported an error, step not final");
        return Ok(verdict_update(
            state,
            false,
            "the executor reported an error".to_owned(),
            retry,
            false,
        ));
    }

    let Some(step) = state.active_step() else {
        return Ok(verdict_update(
            state,
            false,
            "there is no active step".to_owned(),
            retry,
            false,
        ));
    };

    let mut messages = state
        .recent_messages(ctx.config.short_term_memory_window)
        .to_vec();
    messages.push(Message::human(format!(
        "Does the conversation above complete this step?\n\nStep: {}\nDescription: {}",
        step.name, step.description
    )));
    let opts = InvokeOptions::with_system(SYSTEM_PROMPT);

    match ctx
        .invoke_structured::<StepJudgement>(Capability::Validation, &messages, &opts, &judgement_schema())
        .await
    {
        Ok((judgement, _usage)) => {
            info!(
                step = %step.name,
                is_final = judgement.is_final,
                reason = %judgement.reason,
                "step judged"
            );
            Ok(verdict_update(state, judgement.is_final, judgement.reason, retry, false))
        }
        Err(err) => {
            let err = recover(err)?;
            // Without a judge, a step counts as done once it has a result.
            let is_final = step.status == StepStatus::Completed && step.result.is_some();
            warn!(step = %step.name, error = %err, is_final, "step validation model failed");
            Ok(verdict_update(
                state,
                is_final,
                format!("model validation unavailable: {err}"),
                retry,
                true,
            ))
        }
    }
}

fn verdict_update(
    state: &RunState,
    is_final: bool,
    reason: String,
    retry: RetryPolicy,
    degraded: bool,
) -> StateUpdate {
    let content = if is_final {
        "Step complete.".to_owned()
    } else {
        format!("Step not complete: {reason}")
    };

    let mut message = Message::ai(content)
        .from_node(NodeId::ExecValidator)
        .with_verdict(Verdict::Step { is_final, reason });
    if degraded {
        message = message.with_error();
    }

    let retry_count = if is_final {
        retry.after_success()
    } else {
        retry.after_failure()
    };

    StateUpdate::step(NodeId::ExecValidator, state)
        .message(message)
        .retry_count(retry_count)
}
