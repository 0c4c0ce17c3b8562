//! End-to-end runs of the orchestration engine against scripted models and
//! in-process tools.

use std::sync::Arc;
use std::time::Duration;

use cadence_agent::testing::{ScriptedProvider, StaticTools};
use cadence_agent::{
    AgentError, Capability, Engine, KeywordMemory, Message, NodeId, Role, RunConfig, RunOutcome,
    ToolCall,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn balance_call() -> ToolCall {
    ToolCall {
        id: "call-1".into(),
        name: "balance".into(),
        args: json!({"address": "0xabc"}),
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Full runs
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn tool_step_runs_to_completion() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_json(json!({
        "summary": "look up the balance",
        "steps": [{"name": "balance", "description": "Check the wallet balance", "kind": "tools"}]
    }));
    provider.push_json(json!({"validated": true, "reason": "fine"}));
    provider.push_tool_calls(vec![balance_call()]);
    provider.push_text("You have 12 ETH");
    provider.push_json(json!({"final": true, "reason": "balance reported"}));
    provider.push_json(json!({"complete": true, "response": "Your wallet holds 12 ETH."}));

    let tools = StaticTools::empty().with_reply("balance", "12 ETH");
    let engine = Engine::new(provider.clone(), Arc::new(tools.clone()), RunConfig::default());

    let outcome = engine
        .run(Message::human("What is my balance?"))
        .await
        .unwrap();

    let answer = outcome.answer().expect("completed");
    assert_eq!(answer.content, "Your wallet holds 12 ETH.");
    assert!(!answer.is_error());
    assert_eq!(tools.invocations(), vec!["balance"]);

    let state = outcome.state();
    assert_eq!(state.current_graph_step, 7);
    assert!(state.plan.is_empty());
    assert_eq!(state.retry_count, 0);

    let tool_result = state
        .messages
        .iter()
        .find(|m| m.source() == Some(NodeId::Tools))
        .expect("tool result");
    assert_eq!(tool_result.content, "12 ETH");
    assert_eq!(tool_result.tool_call_id.as_deref(), Some("call-1"));
    assert_eq!(provider.remaining(), 0);
}

#[tokio::test]
async fn rejected_plan_is_revised() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_json(json!({"steps": [{"name": "x", "description": "vague"}]}));
    provider.push_json(json!({"validated": false, "reason": "too vague"}));
    provider.push_json(json!({"steps": [{"name": "greet", "description": "Say hello"}]}));
    provider.push_json(json!({"validated": true}));
    provider.push_text("Hello");
    provider.push_json(json!({"final": true}));
    provider.push_json(json!({"complete": true, "response": "Hello"}));

    let engine = Engine::new(
        provider.clone(),
        Arc::new(StaticTools::empty()),
        RunConfig::default(),
    );
    let outcome = engine.run(Message::human("greet me")).await.unwrap();
    assert_eq!(outcome.answer().map(|m| m.content.as_str()), Some("Hello"));

    let revision_prompt = provider.calls()[2].last_content();
    assert!(revision_prompt.contains("too vague"));
}

#[tokio::test]
async fn unfinished_step_ends_after_retry_ceiling() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_json(json!({"steps": [{"name": "s", "description": "never done"}]}));
    provider.push_json(json!({"validated": true}));
    for _ in 0..5 {
        provider.push_text("partial");
        provider.push_json(json!({"final": false, "reason": "incomplete"}));
    }

    let engine = Engine::new(provider, Arc::new(StaticTools::empty()), RunConfig::default());
    let outcome = engine.run(Message::human("do it")).await.unwrap();

    let answer = outcome.answer().expect("completed");
    assert!(answer.is_error());
    assert_eq!(outcome.state().retry_count, 0);
    // planner, validator, then five executor/validator rounds
    assert_eq!(outcome.state().current_graph_step, 12);
}

#[tokio::test]
async fn adaptive_planner_extends_the_plan() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_json(json!({"steps": [{"name": "research", "description": "Find facts"}]}));
    provider.push_json(json!({"validated": true}));
    provider.push_text("facts found");
    provider.push_json(json!({"final": true}));
    provider.push_json(json!({"complete": false, "steps": [{"name": "report", "description": "Write it up"}]}));
    provider.push_json(json!({"validated": true}));
    provider.push_text("report written");
    provider.push_json(json!({"final": true}));
    provider.push_json(json!({"complete": true, "response": "Done: report written"}));

    let engine = Engine::new(
        provider.clone(),
        Arc::new(StaticTools::empty()),
        RunConfig::default(),
    );
    let outcome = engine.run(Message::human("research and report")).await.unwrap();
    assert_eq!(
        outcome.answer().map(|m| m.content.as_str()),
        Some("Done: report written")
    );

    // The second executor call sees the extended plan.
    let exec_prompt = provider.calls()[6].system.clone().unwrap_or_default();
    assert!(exec_prompt.contains("1. research [Message]: Find facts"));
    assert!(exec_prompt.contains("2. report [Message]: Write it up"));
}

#[tokio::test]
async fn failing_tool_aborts_the_run() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_json(json!({"steps": [{"name": "balance", "description": "Check", "kind": "tools"}]}));
    provider.push_json(json!({"validated": true}));
    provider.push_tool_calls(vec![balance_call()]);

    let tools = StaticTools::empty().with_failing("balance", "rpc unreachable");
    let engine = Engine::new(provider, Arc::new(tools), RunConfig::default());

    let err = engine.run(Message::human("balance?")).await.unwrap_err();
    assert!(matches!(err, AgentError::ToolExecutionFailed { .. }));
}

// ═══════════════════════════════════════════════════════════════════════
//  Human in the loop
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn human_step_suspends_and_resumes() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_json(json!({
        "steps": [{"name": "recipient", "description": "Ask who receives the funds", "kind": "human_in_the_loop"}]
    }));
    provider.push_json(json!({"validated": true}));

    let config = RunConfig::default()
        .with_human_in_the_loop(true)
        .with_thread_id("hitl-1");
    let engine = Engine::new(provider.clone(), Arc::new(StaticTools::empty()), config);

    let outcome = engine.run(Message::human("send 1 ETH")).await.unwrap();
    let RunOutcome::Suspended { state, thread_id } = outcome else {
        panic!("expected suspension");
    };
    assert_eq!(thread_id, "hitl-1");
    assert_eq!(state.last_node, Some(NodeId::Human));
    assert_eq!(state.current_graph_step, 3);
    assert!(engine.checkpoints().contains("hitl-1"));

    provider.push_text("Recipient is alice.eth");
    provider.push_json(json!({"final": true}));
    provider.push_json(json!({"complete": true, "response": "Sending 1 ETH to alice.eth"}));

    let resumed = engine.resume("alice.eth", "hitl-1").await.unwrap();
    let answer = resumed.answer().expect("completed");
    assert_eq!(answer.content, "Sending 1 ETH to alice.eth");
    let provenance = answer.provenance.as_ref().expect("provenance");
    assert_eq!(provenance.agent_mode, Some(cadence_agent::AgentMode::Hybrid));
    assert!(engine.checkpoints().is_empty());

    let human_reply = resumed
        .state()
        .messages
        .iter()
        .find(|m| m.content == "alice.eth")
        .expect("human reply");
    assert_eq!(human_reply.source(), Some(NodeId::Human));
}

#[tokio::test]
async fn answered_human_step_can_call_tools_without_asking_again() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_json(json!({
        "steps": [{"name": "recipient", "description": "Ask who receives the funds", "kind": "human_in_the_loop"}]
    }));
    provider.push_json(json!({"validated": true}));

    let tools = StaticTools::empty().with_reply("resolve_ens", "0xabc");
    let config = RunConfig::default()
        .with_human_in_the_loop(true)
        .with_thread_id("hitl-tools");
    let engine = Engine::new(provider.clone(), Arc::new(tools.clone()), config);

    let outcome = engine.run(Message::human("send 1 ETH")).await.unwrap();
    assert!(outcome.is_suspended());

    provider.push_tool_calls(vec![ToolCall {
        id: "call-ens".into(),
        name: "resolve_ens".into(),
        args: json!({"name": "alice.eth"}),
    }]);
    provider.push_text("Recipient alice.eth resolves to 0xabc");
    provider.push_json(json!({"final": true}));
    provider.push_json(json!({"complete": true, "response": "Sending 1 ETH to 0xabc"}));

    let resumed = engine.resume("alice.eth", "hitl-tools").await.unwrap();
    assert!(!resumed.is_suspended());
    assert_eq!(
        resumed.answer().map(|m| m.content.as_str()),
        Some("Sending 1 ETH to 0xabc")
    );
    assert_eq!(tools.invocations(), vec!["resolve_ens"]);

    let prompts = resumed
        .state()
        .messages
        .iter()
        .filter(|m| m.role == Role::Ai && m.source() == Some(NodeId::Human))
        .count();
    assert_eq!(prompts, 1);
    assert!(engine.checkpoints().is_empty());
}

#[tokio::test]
async fn human_step_is_executed_directly_in_autonomous_mode() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_json(json!({
        "steps": [{"name": "ask", "description": "Ask the user", "kind": "human_in_the_loop"}]
    }));
    provider.push_json(json!({"validated": true}));
    provider.push_text("Assumed defaults");
    provider.push_json(json!({"final": true}));
    provider.push_json(json!({"complete": true, "response": "ok"}));

    let engine = Engine::new(provider, Arc::new(StaticTools::empty()), RunConfig::default());
    let outcome = engine.run(Message::human("go")).await.unwrap();
    assert!(!outcome.is_suspended());
}

// ═══════════════════════════════════════════════════════════════════════
//  Cancellation, compaction, memory
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cancellation_aborts_pending_model_call() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_pending();

    let engine = Engine::new(
        provider.clone(),
        Arc::new(StaticTools::empty()),
        RunConfig::default().with_thread_id("cancel-me"),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = engine
        .run_with_cancel(Message::human("slow"), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Cancelled { ref thread_id } if thread_id == "cancel-me"));
    assert_eq!(provider.calls().len(), 1);
}

#[tokio::test]
async fn history_is_compacted_out_of_band() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_text_with_usage(
        json!({"steps": [{"name": "s", "description": "do"}]}).to_string(),
        60,
    );
    provider.push_json(json!({"validated": true}));
    provider.push_text_with_usage("did it", 60);
    provider.push_text("planning and validation happened");
    provider.push_json(json!({"final": true}));
    provider.push_json(json!({"complete": true, "response": "done"}));

    let config = RunConfig {
        memory_budget_tokens: 100,
        ..RunConfig::default()
    };
    let engine = Engine::new(provider.clone(), Arc::new(StaticTools::empty()), config);
    let outcome = engine.run(Message::human("start")).await.unwrap();

    let capabilities: Vec<Capability> = provider.calls().iter().map(|c| c.capability).collect();
    assert_eq!(capabilities[3], Capability::Summarization);

    let state = outcome.state();
    assert_eq!(state.messages[0].content, "start");
    assert_eq!(state.messages[1].source(), Some(NodeId::Summarize));
    // compaction is not a graph step
    assert_eq!(state.current_graph_step, 5);
    assert_eq!(outcome.answer().map(|m| m.content.as_str()), Some("done"));
}

#[tokio::test]
async fn memory_and_rag_context_reach_the_planner() {
    let memory = Arc::new(KeywordMemory::new(3));
    memory
        .remember("mem-thread", "User prefers USDC for swaps", None)
        .await;
    memory
        .remember("docs", "Swap tokens through the DEX aggregator", Some("dex.md".into()))
        .await;

    let provider = Arc::new(ScriptedProvider::new());
    provider.push_json(json!({"steps": [{"name": "swap", "description": "Swap tokens"}]}));

    let config = RunConfig {
        thread_id: "mem-thread".into(),
        rag_scope: Some("docs".into()),
        max_graph_steps: 1,
        ..RunConfig::default()
    };
    let engine = Engine::new(provider.clone(), Arc::new(StaticTools::empty()), config)
        .with_memory(memory);
    let outcome = engine.run(Message::human("swap my tokens to usdc")).await.unwrap();

    let state = outcome.state();
    assert!(state.memory_context.contains("USDC"));
    assert!(state.rag_context.contains("dex.md"));

    let planner_prompt = provider.calls()[0].last_content();
    assert!(planner_prompt.contains("prefers USDC"));
}

#[tokio::test]
async fn steps_record_results() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_json(json!({"steps": [{"name": "a", "description": "first"}, {"name": "b", "description": "second"}]}));
    provider.push_json(json!({"validated": true}));
    provider.push_text("a done");
    provider.push_json(json!({"final": true}));

    // Stop right after the first step is validated.
    let config = RunConfig::default().with_max_graph_steps(4);
    let engine = Engine::new(provider, Arc::new(StaticTools::empty()), config);
    let outcome = engine.run(Message::human("two things")).await.unwrap();

    // The terminal node resets the plan; the executor's result is in history.
    assert!(outcome.state().plan.is_empty());
    assert!(outcome.answer().expect("completed").content.contains("max-iter-4"));
    assert!(
        outcome
            .state()
            .messages
            .iter()
            .any(|m| m.source() == Some(NodeId::Executor) && m.content == "a done")
    );
}
