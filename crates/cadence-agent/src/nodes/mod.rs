//! Graph nodes.
//!
//! Each node is an async function `run(state, ctx) -> Result<StateUpdate>`.
//! Nodes read the state, talk to collaborators through the [`NodeContext`],
//! and return a partial update for the engine to merge.  Recoverable model
//! failures are turned into error-tagged messages inside the node; anything
//! else (tool failures, cancellation) is returned as `Err`.

pub mod adaptive_planner;
pub mod executor;
pub mod human;
pub mod plan_validator;
pub mod planner;
pub mod step_validator;
pub mod terminal;
pub mod tool_invoker;

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::error::{AgentError, Result};
use crate::llm::provider::{
    Capability, InvokeOptions, ModelProvider, StructuredSchema, invoke_structured,
};
use crate::llm::types::{Message, ModelResponse, TokenUsage};
use crate::tools::ToolRegistry;

/// Everything a node needs besides the run state.
#[derive(Clone)]
pub struct NodeContext {
    pub provider: Arc<dyn ModelProvider>,
    pub tools: Arc<dyn ToolRegistry>,
    pub config: RunConfig,
    pub cancel: CancellationToken,
}

impl NodeContext {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        tools: Arc<dyn ToolRegistry>,
        config: RunConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            tools,
            config,
            cancel,
        }
    }

    /// Run `fut` under the run's cancellation token and call timeout.
    pub async fn guard<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = async {
            match self.config.call_timeout() {
                Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                    AgentError::Timeout {
                        operation: operation.to_owned(),
                        secs: limit.as_secs(),
                    }
                })?,
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::info!(operation, thread_id = %self.config.thread_id, "call cancelled");
                Err(AgentError::Cancelled {
                    thread_id: self.config.thread_id.clone(),
                })
            }
            result = bounded => result,
        }
    }

    /// Select a model for `capability` and invoke it.
    pub async fn invoke(
        &self,
        capability: Capability,
        messages: &[Message],
        opts: &InvokeOptions,
    ) -> Result<ModelResponse> {
        let handle = self.provider.select_model(capability, messages)?;
        self.guard("model call", self.provider.invoke(&handle, messages, opts))
            .await
    }

    /// Select a model for `capability` and ask it for a structured answer.
    pub async fn invoke_structured<T: DeserializeOwned>(
        &self,
        capability: Capability,
        messages: &[Message],
        opts: &InvokeOptions,
        schema: &StructuredSchema,
    ) -> Result<(T, TokenUsage)> {
        let handle = self.provider.select_model(capability, messages)?;
        self.guard(
            "model call",
            invoke_structured(self.provider.as_ref(), &handle, messages, opts, schema),
        )
        .await
    }
}

/// Split a node result into "recover with a message" and "propagate".
pub(crate) fn recover(err: AgentError) -> Result<AgentError> {
    if err.is_recoverable() {
        Ok(err)
    } else {
        Err(err)
    }
}

/// Render a tool list for prompts.
pub(crate) fn describe_tools(tools: &[crate::llm::types::ToolDefinition]) -> String {
    if tools.is_empty() {
        return "(no tools available)".to_owned();
    }
    tools
        .iter()
        .map(|t| format!("- `{}`: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render memory and RAG context for prompts.
pub(crate) fn context_block(state: &crate::state::RunState) -> String {
    let mut block = String::new();
    if !state.memory_context.is_empty() {
        block.push_str("\n\n## Relevant Memories\n");
        block.push_str(&state.memory_context);
    }
    if !state.rag_context.is_empty() {
        block.push_str("\n\n## Retrieved Documents\n");
        block.push_str(&state.rag_context);
    }
    block
}
