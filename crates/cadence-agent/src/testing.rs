//! Deterministic in-process collaborators for tests.
//!
//! - [`ScriptedProvider`] answers model calls from a queue and records every
//!   call it receives.
//! - [`StaticTools`] is a tool registry with canned behaviours.
//! - [`StaticAgent`] is a sub-agent with a fixed reply.
//!
//! Available to unit tests and, with the `test-support` feature, to
//! integration tests and downstream crates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::error::{AgentError, Result};
use crate::llm::provider::{Capability, InvokeOptions, ModelHandle, ModelProvider};
use crate::llm::router::{ModelConfig, ModelRouter};
use crate::llm::types::{Message, ModelResponse, TokenUsage, ToolCall, ToolDefinition};
use crate::nodes::NodeContext;
use crate::supervisor::{SubAgent, SupervisorContext};
use crate::tools::ToolRegistry;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Scripted model provider
// ---------------------------------------------------------------------------

enum Scripted {
    Respond(ModelResponse),
    Fail(AgentError),
    Hang,
}

/// A model call as seen by the provider.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub capability: Capability,
    pub model: String,
    pub messages: Vec<Message>,
    pub system: Option<String>,
    /// Names of the tools offered to the model.
    pub tools: Vec<String>,
    pub structured: bool,
}

impl RecordedCall {
    /// Content of the last message sent.
    pub fn last_content(&self) -> String {
        self.messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

/// Model provider that replays queued responses in order.
///
/// An empty queue answers with [`AgentError::ModelRequestFailed`].
pub struct ScriptedProvider {
    router: ModelRouter,
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    /// A provider with one model serving every capability.
    pub fn new() -> Self {
        Self::with_router(ModelRouter::single(ModelConfig::new("scripted", "scripted-model")))
    }

    /// A provider with no models: every selection is `ModelUnavailable`.
    pub fn unavailable() -> Self {
        Self::with_router(ModelRouter::new())
    }

    pub fn with_router(router: ModelRouter) -> Self {
        Self {
            router,
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, entry: Scripted) {
        lock(&self.script).push_back(entry);
    }

    pub fn push_text(&self, content: impl Into<String>) {
        self.push(Scripted::Respond(ModelResponse::text(content, TokenUsage::default())));
    }

    /// Queue a text answer that costs `completion_tokens`.
    pub fn push_text_with_usage(&self, content: impl Into<String>, completion_tokens: u32) {
        self.push(Scripted::Respond(ModelResponse::text(
            content,
            TokenUsage {
                prompt_tokens: 0,
                completion_tokens,
            },
        )));
    }

    /// Queue a structured answer.
    pub fn push_json(&self, value: Value) {
        self.push_text(value.to_string());
    }

    pub fn push_tool_calls(&self, tool_calls: Vec<ToolCall>) {
        self.push(Scripted::Respond(ModelResponse {
            content: String::new(),
            tool_calls,
            usage: TokenUsage::default(),
        }));
    }

    pub fn push_error(&self, err: AgentError) {
        self.push(Scripted::Fail(err));
    }

    /// Queue a call that never returns (for cancellation and timeouts).
    pub fn push_pending(&self) {
        self.push(Scripted::Hang);
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Number of queued responses not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn select_model(&self, capability: Capability, _messages: &[Message]) -> Result<ModelHandle> {
        self.router.handle(capability)
    }

    async fn invoke(
        &self,
        handle: &ModelHandle,
        messages: &[Message],
        opts: &InvokeOptions,
    ) -> Result<ModelResponse> {
        lock(&self.calls).push(RecordedCall {
            capability: handle.capability,
            model: handle.model.clone(),
            messages: messages.to_vec(),
            system: opts.system.clone(),
            tools: opts.tools.iter().map(|t| t.name.clone()).collect(),
            structured: opts.response_schema.is_some(),
        });

        let next = lock(&self.script).pop_front();
        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(AgentError::ModelRequestFailed {
                reason: "script exhausted".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Static tools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Behaviour {
    Echo,
    Reply(String),
    Fail(String),
}

/// Tool registry with canned behaviours.  Clones share the invocation log.
#[derive(Debug, Clone, Default)]
pub struct StaticTools {
    tools: Vec<(ToolDefinition, Behaviour)>,
    invocations: Arc<Mutex<Vec<String>>>,
}

impl StaticTools {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Tools that answer with their own name and arguments.
    pub fn echo(names: &[&str]) -> Self {
        names
            .iter()
            .fold(Self::empty(), |tools, name| tools.with(name, Behaviour::Echo))
    }

    /// Builder: add a tool that always answers `reply`.
    pub fn with_reply(self, name: &str, reply: impl Into<String>) -> Self {
        self.with(name, Behaviour::Reply(reply.into()))
    }

    /// Builder: add a tool whose handler always fails.
    pub fn with_failing(self, name: &str, reason: impl Into<String>) -> Self {
        self.with(name, Behaviour::Fail(reason.into()))
    }

    fn with(mut self, name: &str, behaviour: Behaviour) -> Self {
        self.tools.push((
            ToolDefinition {
                name: name.to_owned(),
                description: format!("Test tool {name}"),
                input_schema: serde_json::json!({"type": "object"}),
            },
            behaviour,
        ));
        self
    }

    /// Names of invoked tools, in order.
    pub fn invocations(&self) -> Vec<String> {
        lock(&self.invocations).clone()
    }
}

#[async_trait]
impl ToolRegistry for StaticTools {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|(def, _)| def.clone()).collect()
    }

    async fn invoke(&self, name: &str, args: Value) -> Result<String> {
        lock(&self.invocations).push(name.to_owned());

        let behaviour = self
            .tools
            .iter()
            .find(|(def, _)| def.name == name)
            .map(|(_, b)| b.clone())
            .ok_or_else(|| AgentError::UnknownTool {
                tool_name: name.to_owned(),
            })?;

        match behaviour {
            Behaviour::Echo => Ok(format!("{name}: {args}")),
            Behaviour::Reply(reply) => Ok(reply),
            Behaviour::Fail(reason) => Err(AgentError::ToolExecutionFailed {
                tool_name: name.to_owned(),
                reason,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Static sub-agent
// ---------------------------------------------------------------------------

/// Sub-agent with a fixed reply that counts its calls.
#[derive(Debug)]
pub struct StaticAgent {
    description: String,
    reply: String,
    failure: Option<String>,
    calls: AtomicUsize,
    saw_fallback: AtomicBool,
}

impl StaticAgent {
    pub fn new(description: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            reply: reply.into(),
            failure: None,
            calls: AtomicUsize::new(0),
            saw_fallback: AtomicBool::new(false),
        }
    }

    /// Builder: every call fails with a model request error.
    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether any call arrived in fallback mode.
    pub fn saw_fallback(&self) -> bool {
        self.saw_fallback.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubAgent for StaticAgent {
    fn description(&self) -> &str {
        &self.description
    }

    async fn handle(&self, _request: &str, ctx: &SupervisorContext) -> Result<Message> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if ctx.in_fallback {
            self.saw_fallback.store(true, Ordering::SeqCst);
        }
        if let Some(reason) = &self.failure {
            return Err(AgentError::ModelRequestFailed {
                reason: reason.clone(),
            });
        }
        Ok(Message::ai(self.reply.clone()))
    }
}

// ---------------------------------------------------------------------------
// Node contexts
// ---------------------------------------------------------------------------

/// A node context with default configuration.
pub fn context_with(provider: Arc<ScriptedProvider>, tools: StaticTools) -> NodeContext {
    context_with_config(provider, tools, RunConfig::default())
}

/// A node context with the given configuration (thread id defaults to
/// `test-thread`).
pub fn context_with_config(
    provider: Arc<ScriptedProvider>,
    tools: StaticTools,
    mut config: RunConfig,
) -> NodeContext {
    if config.thread_id.is_empty() {
        config.thread_id = "test-thread".to_owned();
    }
    NodeContext::new(provider, Arc::new(tools), config, CancellationToken::new())
}
