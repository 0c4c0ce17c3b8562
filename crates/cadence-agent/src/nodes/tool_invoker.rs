//! Tool invoker node.
//!
//! Runs the tool calls requested by the last message, one after another, and
//! appends their results in call order.  Tool failures are not recovered:
//! handlers may have side effects, so the error goes straight to the caller.

use tracing::info;

use crate::error::Result;
use crate::llm::types::Message;
use crate::nodes::NodeContext;
use crate::state::{NodeId, RunState, StateUpdate};

/// Execute pending tool calls.
pub async fn run(state: &RunState, ctx: &NodeContext) -> Result<StateUpdate> {
    let calls = state
        .last_message()
        .map(|m| m.tool_calls.as_slice())
        .unwrap_or_default();

    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        info!(tool = %call.name, call_id = %call.id, "invoking tool");
        let output = ctx
            .guard("tool call", ctx.tools.invoke(&call.name, call.args.clone()))
            .await?;
        results.push(Message::tool_result(&call.name, &call.id, output).from_node(NodeId::Tools));
    }

    Ok(StateUpdate::step(NodeId::Tools, state).messages(results))
}
