//! Model provider contract.
//!
//! The engine never talks to an LLM vendor directly.  Instead every node goes
//! through a [`ModelProvider`], which chooses a concrete model for a
//! [`Capability`] and invokes it.  Structured output (plans, verdicts) is
//! requested with [`invoke_structured`], which asks the provider for JSON,
//! validates it against a JSON Schema, and deserializes it.

use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::llm::types::{Message, ModelResponse, TokenUsage, ToolDefinition};

// ---------------------------------------------------------------------------
// Capabilities and handles
// ---------------------------------------------------------------------------

/// What a node needs a model for.  Providers may map each capability to a
/// different model (e.g. a cheap model for validation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Producing or revising plans.
    Planning,
    /// Executing a plan step, possibly with tools.
    Execution,
    /// Judging plans and step results.
    Validation,
    /// Compacting conversation history.
    Summarization,
    /// Choosing the next sub-agent in the supervisor.
    Routing,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Planning => "planning",
            Self::Execution => "execution",
            Self::Validation => "validation",
            Self::Summarization => "summarization",
            Self::Routing => "routing",
        };
        write!(f, "{s}")
    }
}

/// Opaque reference to the model a provider selected for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    /// Model identifier understood by the provider.
    pub model: String,
    /// The capability the model was selected for.
    pub capability: Capability,
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// System instructions for the call.
    pub system: Option<String>,

    /// Tools the model may request.
    pub tools: Vec<ToolDefinition>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Maximum tokens the model may generate.
    pub max_tokens: Option<u32>,

    /// When set, the model is asked to answer with JSON matching this schema.
    pub response_schema: Option<Value>,
}

impl InvokeOptions {
    /// Options with a system prompt and deterministic sampling.
    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            temperature: Some(0.0),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Chooses and invokes models on behalf of graph nodes.
///
/// Implementations must report a missing model as
/// [`AgentError::ModelUnavailable`] rather than panicking, so nodes can
/// recover locally.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Select a model for the given capability and conversation.
    fn select_model(&self, capability: Capability, messages: &[Message]) -> Result<ModelHandle>;

    /// Invoke a model with the given conversation.
    async fn invoke(
        &self,
        handle: &ModelHandle,
        messages: &[Message],
        opts: &InvokeOptions,
    ) -> Result<ModelResponse>;
}

// ---------------------------------------------------------------------------
// Structured output
// ---------------------------------------------------------------------------

/// A named JSON Schema describing a structured model answer.
#[derive(Debug, Clone)]
pub struct StructuredSchema {
    /// Short name used in error messages and logs.
    pub name: &'static str,
    /// Draft-7 JSON Schema.
    pub schema: Value,
}

impl StructuredSchema {
    /// Check `instance` against the schema.
    pub fn validate(&self, instance: &Value) -> Result<()> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&self.schema)
            .map_err(|e| AgentError::Internal(format!("invalid schema `{}`: {e}", self.name)))?;

        if let Err(errors) = compiled.validate(instance) {
            let reasons: Vec<String> = errors
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect();
            return Err(AgentError::StructuredOutputInvalid {
                schema: self.name.to_owned(),
                reason: reasons.join(", "),
            });
        }

        Ok(())
    }
}

/// Invoke the model and parse its answer as `T`.
///
/// The answer must be a JSON document (optionally wrapped in markdown code
/// fences) that validates against `schema`.  Returns the parsed value and the
/// token usage of the call.
pub async fn invoke_structured<T: DeserializeOwned>(
    provider: &dyn ModelProvider,
    handle: &ModelHandle,
    messages: &[Message],
    opts: &InvokeOptions,
    schema: &StructuredSchema,
) -> Result<(T, TokenUsage)> {
    let mut opts = opts.clone();
    opts.response_schema = Some(schema.schema.clone());
    opts.tools.clear();

    let response = provider.invoke(handle, messages, &opts).await?;
    if response.wants_tools() {
        return Err(AgentError::ModelParseFailed {
            reason: format!(
                "model returned tool calls while `{}` output was expected",
                schema.name
            ),
        });
    }

    let value = parse_structured(&response.content, schema)?;
    let parsed = serde_json::from_value(value).map_err(|e| AgentError::ModelParseFailed {
        reason: format!("`{}` output does not match its type: {e}", schema.name),
    })?;

    Ok((parsed, response.usage))
}

/// Extract, parse, and validate a JSON answer.
pub fn parse_structured(text: &str, schema: &StructuredSchema) -> Result<Value> {
    let json_str = extract_json_block(text);
    let value: Value = serde_json::from_str(json_str).map_err(|e| AgentError::ModelParseFailed {
        reason: format!("failed to parse `{}` JSON: {e}\nRaw response:\n{text}", schema.name),
    })?;
    schema.validate(&value)?;
    Ok(value)
}

/// Try to extract a JSON block from text that might be wrapped in markdown
/// code fences.
pub fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();

    // Check for ```json ... ``` fences.
    if let Some(start) = trimmed.find("```json") {
        let json_start = start + 7; // len("```json")
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    // Check for ``` ... ``` fences (without language tag).
    if let Some(start) = trimmed.find("```") {
        let json_start = start + 3;
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    trimmed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
