//! Multi-agent supervisor.
//!
//! Routes a request among registered sub-agents.  Agents are registered in a
//! kernel [`AgentRegistry`] under sanitized node names; the engine's own node
//! names are reserved so an agent can never shadow them.
//!
//! Two modes:
//!
//! - [`Supervisor::directive`] -- used as a graph node: returns a message
//!   naming the next agent (`provenance.next_agent`).
//! - [`Supervisor::run`] -- used as an entry point: hops between agents until
//!   the router says `FINISH` and returns the final answer.
//!
//! Every dispatch goes one level deeper in the [`SupervisorContext`].  Past
//! [`MAX_EXECUTION_DEPTH`] the router is bypassed and the default agent
//! answers directly; if that fails too, or the run is already in fallback,
//! the supervisor gives up with an error-tagged final message.
//!
//! A failing sub-agent ends the dispatch with an error-tagged final message.
//! Cancellation and tool failures are not answers and propagate unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use cadence_kernel::AgentRegistry;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentMode;
use crate::engine::{Engine, RunOutcome};
use crate::error::{AgentError, Result};
use crate::llm::provider::{
    Capability, InvokeOptions, ModelProvider, StructuredSchema, invoke_structured,
};
use crate::llm::types::Message;
use crate::routing::TERMINAL_MARKER;
use crate::state::NodeId;

/// Dispatch depth beyond which the router is no longer consulted.
pub const MAX_EXECUTION_DEPTH: u32 = 5;

/// Router answer that ends a supervised run.
pub const FINISH: &str = "FINISH";

const DEFAULT_MAX_HOPS: usize = 8;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Per-dispatch context, passed explicitly through nested calls.
#[derive(Debug, Clone)]
pub struct SupervisorContext {
    pub execution_depth: u32,
    pub in_fallback: bool,
    pub thread_id: String,
    pub cancel: CancellationToken,
}

impl SupervisorContext {
    /// Top-level context for a thread.
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            execution_depth: 0,
            in_fallback: false,
            thread_id: thread_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Builder: use `cancel` for every call made under this context.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Context for a call one level deeper.
    pub fn nested(&self) -> Self {
        Self {
            execution_depth: self.execution_depth + 1,
            ..self.clone()
        }
    }

    fn fallback(&self) -> Self {
        Self {
            in_fallback: true,
            ..self.nested()
        }
    }

    fn too_deep(&self) -> bool {
        self.execution_depth > MAX_EXECUTION_DEPTH
    }
}

// ---------------------------------------------------------------------------
// Sub-agents
// ---------------------------------------------------------------------------

/// Something the supervisor can dispatch a request to.
#[async_trait]
pub trait SubAgent: Send + Sync {
    /// One-line description shown to the routing model.
    fn description(&self) -> &str;

    /// Handle a request and return the answer.  An error-tagged answer is a
    /// failure the agent reported itself; it stays tagged in the final message.
    async fn handle(&self, request: &str, ctx: &SupervisorContext) -> Result<Message>;
}

/// Shared handle stored in the registry.
pub type AgentHandle = Arc<dyn SubAgent>;

/// A registry that reserves the engine's node names and [`FINISH`].
pub fn agent_registry() -> AgentRegistry<AgentHandle> {
    let reserved = NodeId::ALL
        .iter()
        .map(|n| n.as_str().to_owned())
        .chain(std::iter::once(FINISH.to_lowercase()));
    AgentRegistry::with_reserved(reserved)
}

/// Runs a full plan-execute-validate [`Engine`] as a sub-agent.
pub struct EngineAgent {
    engine: Engine,
    description: String,
}

impl EngineAgent {
    pub fn new(engine: Engine, description: impl Into<String>) -> Self {
        Self {
            engine,
            description: description.into(),
        }
    }
}

#[async_trait]
impl SubAgent for EngineAgent {
    fn description(&self) -> &str {
        &self.description
    }

    async fn handle(&self, request: &str, ctx: &SupervisorContext) -> Result<Message> {
        let outcome = self
            .engine
            .run_with_cancel(Message::human(request), ctx.cancel.child_token())
            .await?;

        match outcome {
            RunOutcome::Completed { answer, .. } => Ok(answer),
            RunOutcome::Suspended { thread_id, .. } => {
                warn!(thread_id = %thread_id, "sub-engine suspended for human input");
                Ok(Message::ai(format!(
                    "Unable to answer: the run suspended for human input on thread {thread_id}."
                ))
                .with_error())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct RoutingChoice {
    next: String,
    #[serde(default)]
    reason: String,
}

fn routing_schema() -> StructuredSchema {
    StructuredSchema {
        name: "routing_choice",
        schema: json!({
            "type": "object",
            "required": ["next"],
            "properties": {
                "next": {"type": "string"},
                "reason": {"type": "string"}
            }
        }),
    }
}

/// Where the router sent a request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Choice {
    Agent { node: String, reason: String },
    Finish { reason: String },
}

/// Routes requests among registered sub-agents.
pub struct Supervisor {
    registry: AgentRegistry<AgentHandle>,
    provider: Arc<dyn ModelProvider>,
    default_agent: Option<String>,
    max_hops: usize,
}

impl Supervisor {
    /// Create a supervisor over a (possibly shared) registry.
    pub fn new(provider: Arc<dyn ModelProvider>, registry: AgentRegistry<AgentHandle>) -> Self {
        Self {
            registry,
            provider,
            default_agent: None,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    /// Builder: cap the number of agent hops in [`Supervisor::run`].
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops.max(1);
        self
    }

    pub fn registry(&self) -> &AgentRegistry<AgentHandle> {
        &self.registry
    }

    /// Register an agent; returns its node name.
    pub fn register(&self, id: impl Into<String>, agent: AgentHandle) -> Result<String> {
        let description = agent.description().to_owned();
        Ok(self.registry.register(id, description, agent)?)
    }

    /// Designate the agent used for fallbacks and unknown router choices.
    pub fn set_default(&mut self, agent_id: &str) -> Result<()> {
        let node = self.registry.resolve_node(agent_id)?;
        info!(agent_id, node = %node, "default agent set");
        self.default_agent = Some(node);
        Ok(())
    }

    /// Graph-node mode: decide which agent handles the conversation next.
    ///
    /// Past the depth limit the default agent answers immediately and the
    /// returned message is final.
    pub async fn directive(
        &self,
        conversation: &[Message],
        ctx: &SupervisorContext,
    ) -> Result<Message> {
        if ctx.too_deep() {
            let request = latest_request(conversation);
            return self.fallback(&request, ctx).await;
        }

        let message = match self.choose(conversation, ctx).await? {
            Choice::Agent { node, reason } => {
                let mut message =
                    Message::ai(format!("Routing to `{node}`: {reason}")).from_node(NodeId::Supervisor);
                if let Some(p) = message.provenance.as_mut() {
                    p.next_agent = Some(node);
                }
                message
            }
            Choice::Finish { reason } => {
                let mut message = Message::ai(format!("Finished: {reason} {TERMINAL_MARKER}"))
                    .from_node(NodeId::Supervisor);
                if let Some(p) = message.provenance.as_mut() {
                    p.next_agent = Some(NodeId::End.as_str().to_owned());
                }
                message
            }
        };
        Ok(message)
    }

    /// Entry-point mode: route between agents until done and return the
    /// final answer.
    pub async fn run(&self, request: &str, ctx: &SupervisorContext) -> Result<Message> {
        if ctx.too_deep() {
            return self.fallback(request, ctx).await;
        }

        let mut conversation = vec![Message::human(request)];
        let mut answer: Option<Message> = None;

        for hop in 0..self.max_hops {
            let node = match self.choose(&conversation, ctx).await? {
                Choice::Finish { reason } => {
                    debug!(hop, %reason, "router finished");
                    break;
                }
                Choice::Agent { node, .. } => node,
            };

            let (info, agent) = self.registry.get_by_node(&node)?;
            info!(hop, agent = %info.id, node = %node, depth = ctx.execution_depth, "dispatching");

            let output = match agent.handle(request, &ctx.nested()).await {
                Ok(output) => output,
                Err(err) => return dispatch_failure(&info.id, err),
            };

            let mut reply = Message::ai(output.content.clone()).from_node(NodeId::Supervisor);
            reply.name = Some(node);
            let failed = output.is_error();
            if failed {
                reply = reply.with_error();
            }
            conversation.push(reply);
            answer = Some(output);
            if failed {
                warn!(hop, agent = %info.id, "agent reported a failure, ending the run");
                break;
            }
        }

        let Some(output) = answer else {
            warn!("router finished without dispatching, using the default agent");
            return self.answer_with_default(request, ctx).await;
        };

        let is_error = output.is_error();
        Ok(final_message(output.content, is_error))
    }

    /// Bypass the router and ask the default agent directly.
    async fn fallback(&self, request: &str, ctx: &SupervisorContext) -> Result<Message> {
        if ctx.in_fallback {
            warn!(depth = ctx.execution_depth, "depth limit hit again while in fallback");
            return Ok(final_message(
                format!("Unable to answer: recursion depth exceeded ({}).", ctx.execution_depth),
                true,
            ));
        }

        warn!(depth = ctx.execution_depth, "depth limit exceeded, answering with default agent");
        let Some(node) = self.default_agent.as_deref() else {
            return Ok(final_message(
                "Unable to answer: recursion depth exceeded and no default agent is set.".into(),
                true,
            ));
        };

        let (info, agent) = self.registry.get_by_node(node)?;
        match agent.handle(request, &ctx.fallback()).await {
            Ok(output) => {
                let is_error = output.is_error();
                Ok(final_message(output.content, is_error))
            }
            Err(err) => dispatch_failure(&info.id, err),
        }
    }

    async fn answer_with_default(&self, request: &str, ctx: &SupervisorContext) -> Result<Message> {
        let node = self.default_node()?;
        let (info, agent) = self.registry.get_by_node(&node)?;
        match agent.handle(request, &ctx.nested()).await {
            Ok(output) => {
                let is_error = output.is_error();
                Ok(final_message(output.content, is_error))
            }
            Err(err) => dispatch_failure(&info.id, err),
        }
    }

    fn default_node(&self) -> Result<String> {
        self.default_agent
            .clone()
            .ok_or_else(|| AgentError::ConfigError {
                reason: "supervisor has no default agent".into(),
            })
    }

    /// Ask the routing model for the next agent.  Unknown answers and an
    /// unavailable router fall back to the default agent.
    async fn choose(&self, conversation: &[Message], ctx: &SupervisorContext) -> Result<Choice> {
        let agents = self.registry.list()?;
        let roster = agents
            .iter()
            .map(|a| format!("- `{}`: {}", a.node_name, a.description))
            .collect::<Vec<_>>()
            .join("\n");
        let opts = InvokeOptions::with_system(format!(
            "You route requests to agents. Pick the agent that should act next, or `{FINISH}` once the request has been answered.\n\n## Agents\n{roster}\n\nRespond with JSON only: {{\"next\": \"<agent or {FINISH}>\", \"reason\": \"...\"}}"
        ));

        let call = async {
            let handle = self.provider.select_model(Capability::Routing, conversation)?;
            invoke_structured::<RoutingChoice>(
                self.provider.as_ref(),
                &handle,
                conversation,
                &opts,
                &routing_schema(),
            )
            .await
        };
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(AgentError::Cancelled { thread_id: ctx.thread_id.clone() }),
            result = call => result,
        };

        let choice = match result {
            Ok((choice, _usage)) => choice,
            Err(err) if err.is_recoverable() => {
                warn!(error = %err, "router unavailable, using default agent");
                return Ok(Choice::Agent {
                    node: self.default_node()?,
                    reason: "router unavailable".into(),
                });
            }
            Err(err) => return Err(err),
        };

        let next = choice.next.trim();
        if next.eq_ignore_ascii_case(FINISH) {
            return Ok(Choice::Finish {
                reason: choice.reason,
            });
        }
        if agents.iter().any(|a| a.node_name == next) {
            return Ok(Choice::Agent {
                node: next.to_owned(),
                reason: choice.reason,
            });
        }

        warn!(choice = %next, "router chose an unknown agent, using default agent");
        Ok(Choice::Agent {
            node: self.default_node()?,
            reason: format!("unknown choice `{next}`"),
        })
    }
}

fn latest_request(conversation: &[Message]) -> String {
    conversation
        .iter()
        .rev()
        .find(|m| m.role == crate::llm::types::Role::Human)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

/// Turn a sub-agent error into the dispatch result.  Cancellation and tool
/// failures propagate; anything else becomes an error-tagged final answer.
fn dispatch_failure(agent_id: &str, err: AgentError) -> Result<Message> {
    match err {
        AgentError::Cancelled { .. }
        | AgentError::ToolExecutionFailed { .. }
        | AgentError::UnknownTool { .. } => Err(err),
        other => {
            warn!(agent = %agent_id, error = %other, "sub-agent failed");
            Ok(final_message(
                format!("Unable to answer: agent `{agent_id}` failed: {other}"),
                true,
            ))
        }
    }
}

fn final_message(content: String, error: bool) -> Message {
    let message = Message::ai(content)
        .from_node(NodeId::Supervisor)
        .finalized(AgentMode::Autonomous);
    if error { message.with_error() } else { message }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
