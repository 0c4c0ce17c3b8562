//! History compaction: summarize old messages once the conversation's
//! completion-token cost exceeds the configured budget.
//!
//! The engine checks the budget before every node.  When it is exceeded:
//!
//! 1. Messages are scanned newest to oldest, accumulating completion tokens.
//! 2. The message at which the budget is crossed, and everything older except
//!    the very first message, is folded into a summary.
//! 3. The history becomes `[first, summary, ...tail]`, and the last message is
//!    re-attributed to the summarizer.
//!
//! Compaction is out-of-band: it does not count as a graph step and does not
//! change `last_node`.  If the summary call fails the history is left alone.

use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::llm::provider::{Capability, InvokeOptions};
use crate::llm::types::{Message, Role};
use crate::nodes::{NodeContext, recover};
use crate::state::{NodeId, RunState, StateUpdate};

/// Fewest messages worth folding: one summary must replace at least two.
const MIN_FOLD: usize = 2;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Total completion tokens across `messages`.
pub fn completion_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(|m| u64::from(m.completion_tokens())).sum()
}

/// Whether `messages` exceed the completion-token budget.
pub fn needs_compaction(messages: &[Message], budget_tokens: u32) -> bool {
    completion_tokens(messages) > u64::from(budget_tokens)
}

/// Index one past the last message to fold, or `None` when nothing can be
/// folded.  Messages `1..end` are summarized; `end..` is kept verbatim.
pub fn fold_end(messages: &[Message], budget_tokens: u32) -> Option<usize> {
    if !needs_compaction(messages, budget_tokens) || messages.len() <= MIN_FOLD {
        return None;
    }

    let budget = u64::from(budget_tokens);
    let mut acc = 0u64;
    let mut end = 1;
    for (i, message) in messages.iter().enumerate().skip(1).rev() {
        acc += u64::from(message.completion_tokens());
        if acc > budget {
            end = i + 1;
            break;
        }
    }

    // Borrow from the front of the tail until at least two messages fold.
    let end = end.max(1 + MIN_FOLD);
    (end <= messages.len()).then_some(end)
}

/// Compact the run's history if it is over budget.
///
/// Returns `Ok(None)` when no compaction was needed or the summary call
/// failed recoverably; `Err` only for cancellation and other
/// non-recoverable failures.
pub async fn compact(state: &RunState, ctx: &NodeContext) -> Result<Option<StateUpdate>> {
    let messages = &state.messages;
    let budget = ctx.config.memory_budget_tokens;

    let Some(end) = fold_end(messages, budget) else {
        if needs_compaction(messages, budget) {
            debug!(total = messages.len(), "history over budget but too short to fold");
        }
        return Ok(None);
    };

    let folded = &messages[1..end];
    let tail = &messages[end..];
    info!(
        tokens = completion_tokens(messages),
        budget,
        folded = folded.len(),
        kept = tail.len(),
        "compacting conversation history"
    );

    let summary = match summarize(folded, ctx).await {
        Ok(summary) => summary,
        Err(err) => {
            let err = recover(err)?;
            warn!(error = %err, "summary failed, keeping full history");
            return Ok(None);
        }
    };

    let mut compacted = Vec::with_capacity(2 + tail.len());
    compacted.push(messages[0].clone());
    compacted.push(
        Message::ai(format!(
            "[Conversation summary of {count} earlier messages]\n{summary}",
            count = folded.len(),
        ))
        .from_node(NodeId::Summarize),
    );
    compacted.extend_from_slice(tail);

    if let Some(last) = compacted.pop() {
        compacted.push(last.from_node(NodeId::Summarize));
    }

    info!(original = messages.len(), compacted = compacted.len(), "compaction complete");
    Ok(Some(StateUpdate::default().replace_messages(compacted)))
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn format_messages_for_summary(messages: &[Message]) -> String {
    let mut buf = String::with_capacity(messages.len() * 200);
    for msg in messages {
        let label = match msg.role {
            Role::Human => "User",
            Role::Ai => "Assistant",
            Role::Tool => "Tool",
        };
        buf.push_str(label);
        buf.push_str(": ");
        buf.push_str(&msg.content);
        for call in &msg.tool_calls {
            buf.push_str(&format!("\n  [tool_call: {}({})]", call.name, call.args));
        }
        buf.push('\n');
    }
    buf
}

async fn summarize(messages: &[Message], ctx: &NodeContext) -> Result<String> {
    let prompt = format!(
        "Summarize the following conversation concisely, keeping facts, decisions and \
         tool results needed to continue the task.\n\n{}",
        format_messages_for_summary(messages)
    );
    let opts = InvokeOptions {
        max_tokens: Some(1024),
        ..InvokeOptions::with_system("You write faithful, brief summaries.")
    };

    let response = ctx
        .invoke(Capability::Summarization, &[Message::human(prompt)], &opts)
        .await?;
    if response.wants_tools() {
        return Err(AgentError::ModelParseFailed {
            reason: "summarization returned tool calls instead of text".into(),
        });
    }
    Ok(response.content)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::TokenUsage;
    use crate::testing::{ScriptedProvider, StaticTools, context_with};
    use std::sync::Arc;

    fn costly(content: &str, tokens: u32) -> Message {
        Message::ai(content).with_usage(TokenUsage {
            prompt_tokens: 0,
            completion_tokens: tokens,
        })
    }

    fn long_history() -> RunState {
        let mut state = RunState::new(Message::human("start"));
        for i in 0..120 {
            state.messages.push(costly(&format!("m{i}"), 100));
        }
        state
    }

    #[test]
    fn below_budget_is_untouched() {
        let messages = vec![Message::human("start"), costly("a", 500)];
        assert!(!needs_compaction(&messages, 11_000));
        assert_eq!(fold_end(&messages, 11_000), None);
    }

    #[test]
    fn fold_point_is_where_budget_is_crossed() {
        let state = long_history();
        // the newest 111 messages cost 11,100 tokens; m9 (index 10) tips it
        assert_eq!(fold_end(&state.messages, 11_000), Some(11));
    }

    #[test]
    fn short_spans_borrow_from_the_tail() {
        let messages = vec![
            Message::human("start"),
            costly("huge", 20_000),
            costly("a", 10),
            costly("b", 10),
        ];
        // "huge" alone crosses the budget; "a" is folded with it
        assert_eq!(fold_end(&messages, 11_000), Some(3));
    }

    #[test]
    fn too_short_history_is_not_folded() {
        let messages = vec![Message::human("start"), costly("huge", 20_000)];
        assert_eq!(fold_end(&messages, 11_000), None);
    }

    #[tokio::test]
    async fn compaction_keeps_first_and_tags_last() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_text("earlier work summarized");
        let ctx = context_with(provider.clone(), StaticTools::empty());

        let mut state = long_history();
        let update = compact(&state, &ctx).await.unwrap().expect("compacted");
        state.apply(update);

        assert_eq!(state.messages.len(), 112);
        assert!(state.messages.len() < 121);
        assert_eq!(state.messages[0].content, "start");
        assert_eq!(state.messages[1].source(), Some(NodeId::Summarize));
        assert!(state.messages[1].content.contains("earlier work summarized"));
        assert_eq!(
            state.last_message().and_then(Message::source),
            Some(NodeId::Summarize)
        );
        assert_eq!(state.last_message().map(|m| m.content.as_str()), Some("m119"));
        assert_eq!(provider.calls()[0].capability, Capability::Summarization);
    }

    #[tokio::test]
    async fn failed_summary_leaves_history() {
        let ctx = context_with(Arc::new(ScriptedProvider::unavailable()), StaticTools::empty());
        let state = long_history();
        assert!(compact(&state, &ctx).await.unwrap().is_none());
    }

    #[test]
    fn summary_text_lists_roles_and_tool_calls() {
        let text = format_messages_for_summary(&[
            Message::human("hi"),
            Message::ai_tool_calls(
                "",
                vec![crate::llm::types::ToolCall {
                    id: "1".into(),
                    name: "quote".into(),
                    args: serde_json::json!({"pair": "ETH"}),
                }],
            ),
        ]);
        assert!(text.starts_with("User: hi\n"));
        assert!(text.contains("[tool_call: quote("));
    }
}
