//! Orchestration engine.
//!
//! Drives one run through the graph:
//!
//! ```text
//!   loop {
//!       compact history if over budget      (out-of-band)
//!       next = route(state, config)
//!       update = next.run(state)
//!       state.apply(update)
//!   }
//! ```
//!
//! The loop ends at the terminal node, or suspends at the human node.  A
//! suspended run is checkpointed under its thread id and continues with
//! [`Engine::resume`].  Cancelling the run's token aborts the pending model
//! or tool call; the in-flight update is dropped and the state discarded.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::compaction;
use crate::config::RunConfig;
use crate::error::{AgentError, Result};
use crate::llm::provider::ModelProvider;
use crate::llm::types::Message;
use crate::memory::MemoryService;
use crate::nodes::{
    NodeContext, adaptive_planner, executor, human, plan_validator, planner, step_validator,
    terminal, tool_invoker,
};
use crate::routing::route;
use crate::state::{NodeId, RunState, StateUpdate, StepStatus};
use crate::tools::ToolRegistry;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a run left the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run reached the terminal node.
    Completed {
        state: RunState,
        /// The final answer (`provenance.final == true`).
        answer: Message,
    },
    /// The run is waiting for human input.
    Suspended { state: RunState, thread_id: String },
}

impl RunOutcome {
    pub fn state(&self) -> &RunState {
        match self {
            Self::Completed { state, .. } | Self::Suspended { state, .. } => state,
        }
    }

    /// The final answer, if the run completed.
    pub fn answer(&self) -> Option<&Message> {
        match self {
            Self::Completed { answer, .. } => Some(answer),
            Self::Suspended { .. } => None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The plan-execute-validate engine.
#[derive(Clone)]
pub struct Engine {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<dyn ToolRegistry>,
    memory: Option<Arc<dyn MemoryService>>,
    checkpoints: CheckpointStore,
    config: RunConfig,
}

impl Engine {
    /// Create an engine with its collaborators and per-run configuration.
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        tools: Arc<dyn ToolRegistry>,
        config: RunConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            memory: None,
            checkpoints: CheckpointStore::new(),
            config,
        }
    }

    /// Builder: retrieve memory and RAG context before planning.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Builder: share a checkpoint store with other engines.
    pub fn with_checkpoints(mut self, checkpoints: CheckpointStore) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Start a run.
    pub async fn run(&self, input: Message) -> Result<RunOutcome> {
        self.run_with_cancel(input, CancellationToken::new()).await
    }

    /// Start a run that can be aborted through `cancel`.
    pub async fn run_with_cancel(
        &self,
        input: Message,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let mut config = self.config.clone();
        if config.thread_id.is_empty() {
            config.thread_id = Uuid::now_v7().to_string();
        }
        config.validate()?;

        info!(
            thread_id = %config.thread_id,
            mode = ?config.agent_mode(),
            max_graph_steps = config.max_graph_steps,
            "run started"
        );

        let ctx = self.context(config, cancel);
        let mut state = RunState::new(input);
        self.retrieve_context(&mut state, &ctx).await?;
        self.drive(state, ctx).await
    }

    /// Continue a suspended run with the human's answer.
    pub async fn resume(&self, input: impl Into<String>, thread_id: &str) -> Result<RunOutcome> {
        self.resume_with_cancel(input, thread_id, CancellationToken::new())
            .await
    }

    /// Continue a suspended run that can be aborted through `cancel`.
    pub async fn resume_with_cancel(
        &self,
        input: impl Into<String>,
        thread_id: &str,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let Checkpoint {
            mut state, config, ..
        } = self
            .checkpoints
            .take(thread_id)
            .ok_or_else(|| AgentError::ThreadNotSuspended {
                thread_id: thread_id.to_owned(),
            })?;

        info!(thread_id = %thread_id, graph_step = state.current_graph_step, "run resumed");
        let mut update =
            StateUpdate::default().message(Message::human(input).from_node(NodeId::Human));
        // The answer belongs to the active step; it is no longer waiting.
        if state.active_step().is_some() {
            let mut plan = state.plan.clone();
            plan.steps[state.current_step_index].status = StepStatus::InProgress;
            update = update.plan(plan);
        }
        state.apply(update);
        self.drive(state, self.context(config, cancel)).await
    }

    fn context(&self, config: RunConfig, cancel: CancellationToken) -> NodeContext {
        NodeContext::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.tools),
            config,
            cancel,
        )
    }

    /// Fill `memory_context` and `rag_context` from the memory service.
    /// Retrieval failures leave the context empty.
    async fn retrieve_context(&self, state: &mut RunState, ctx: &NodeContext) -> Result<()> {
        let Some(memory) = &self.memory else {
            return Ok(());
        };
        let query = state.objective().to_owned();

        let mut scopes = vec![(ctx.config.thread_id.clone(), false)];
        if let Some(rag) = &ctx.config.rag_scope {
            scopes.push((rag.clone(), true));
        }

        let mut update = StateUpdate::default();
        for (scope, is_rag) in scopes {
            let entries = match ctx
                .guard("memory retrieval", memory.retrieve_relevant(&query, &scope))
                .await
            {
                Ok(entries) => entries,
                Err(err @ AgentError::Cancelled { .. }) => return Err(err),
                Err(err) => {
                    warn!(scope = %scope, error = %err, "memory retrieval failed");
                    continue;
                }
            };
            debug!(scope = %scope, hits = entries.len(), is_rag, "context retrieved");
            let block = memory.format(&entries);
            if is_rag {
                update.rag_context = Some(block);
            } else {
                update.memory_context = Some(block);
            }
        }

        state.apply(update);
        Ok(())
    }

    async fn drive(&self, mut state: RunState, ctx: NodeContext) -> Result<RunOutcome> {
        loop {
            if let Some(update) = compaction::compact(&state, &ctx).await? {
                state.apply(update);
            }

            let next = route(&state, &ctx.config);
            debug!(
                thread_id = %ctx.config.thread_id,
                graph_step = state.current_graph_step,
                last_node = ?state.last_node,
                next = %next,
                "routing"
            );

            let update = match next {
                NodeId::Planner => planner::run(&state, &ctx).await?,
                NodeId::PlannerValidator => plan_validator::run(&state, &ctx).await?,
                NodeId::Executor => executor::run(&state, &ctx).await?,
                NodeId::ExecValidator => step_validator::run(&state, &ctx).await?,
                NodeId::Tools => tool_invoker::run(&state, &ctx).await?,
                NodeId::AdaptivePlanner => adaptive_planner::run(&state, &ctx).await?,
                NodeId::Human => {
                    state.apply(human::run(&state));
                    let thread_id = ctx.config.thread_id.clone();
                    self.checkpoints
                        .save(thread_id.clone(), Checkpoint::new(state.clone(), ctx.config.clone()));
                    info!(thread_id = %thread_id, "run suspended for human input");
                    return Ok(RunOutcome::Suspended { state, thread_id });
                }
                NodeId::End => {
                    state.apply(terminal::end_graph(&state, &ctx.config));
                    let answer = state
                        .last_message()
                        .cloned()
                        .ok_or_else(|| AgentError::Internal("run ended without a message".into()))?;
                    info!(
                        thread_id = %ctx.config.thread_id,
                        graph_steps = state.current_graph_step,
                        error = answer.is_error(),
                        "run completed"
                    );
                    return Ok(RunOutcome::Completed { state, answer });
                }
                NodeId::Summarize | NodeId::Supervisor => {
                    return Err(AgentError::Internal(format!(
                        "node `{next}` cannot be scheduled by the engine"
                    )));
                }
            };

            state.apply(update);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
