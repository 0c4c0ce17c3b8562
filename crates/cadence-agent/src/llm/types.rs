//! Core types for model interaction.
//!
//! These types model the data flowing between graph nodes and the model
//! provider.  They are provider-agnostic; concrete providers translate them
//! into whatever wire format their vendor expects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AgentMode;
use crate::state::NodeId;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Input from the human user (including resumed human-in-the-loop input).
    Human,
    /// Output from the model or a graph node speaking on its behalf.
    Ai,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

/// A single message in a run's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,

    /// The textual content of the message.
    ///
    /// For [`Role::Tool`] messages this contains the serialized tool result.
    /// For [`Role::Ai`] messages that only request tools, this may be empty.
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the model (only present on [`Role::Ai`]).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Which tool call this message answers (only on [`Role::Tool`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Name of the tool that produced this result (only on [`Role::Tool`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Which node produced the message and how it should be interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,

    /// Token cost of producing this message, when it came from a model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            provenance: None,
            usage: None,
        }
    }

    /// Create a human message.
    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    /// Create an AI text message.
    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }

    /// Create an AI message that requests tool calls.
    pub fn ai_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Ai, content)
        }
    }

    /// Create a tool result message.
    pub fn tool_result(
        name: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// Builder: tag the message with the node that produced it.
    pub fn from_node(mut self, node: NodeId) -> Self {
        match self.provenance.as_mut() {
            Some(p) => p.from = node,
            None => self.provenance = Some(Provenance::new(node)),
        }
        self
    }

    /// Builder: mark the message as reporting a (recovered) failure.
    pub fn with_error(mut self) -> Self {
        self.provenance_mut().error = true;
        self
    }

    /// Builder: attach a validator verdict.
    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.provenance_mut().verdict = Some(verdict);
        self
    }

    /// Builder: mark the message as the final answer of a run.
    pub fn finalized(mut self, mode: AgentMode) -> Self {
        let p = self.provenance_mut();
        p.is_final = true;
        p.agent_mode = Some(mode);
        self
    }

    /// Builder: attach the token cost of producing this message.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// The node that produced this message, if known.
    pub fn source(&self) -> Option<NodeId> {
        self.provenance.as_ref().map(|p| p.from)
    }

    /// Whether the message is tagged as reporting a failure.
    pub fn is_error(&self) -> bool {
        self.provenance.as_ref().is_some_and(|p| p.error)
    }

    /// The validator verdict carried by this message, if any.
    pub fn verdict(&self) -> Option<&Verdict> {
        self.provenance.as_ref().and_then(|p| p.verdict.as_ref())
    }

    /// Completion tokens attributed to this message (0 when unknown).
    pub fn completion_tokens(&self) -> u32 {
        self.usage.map_or(0, |u| u.completion_tokens)
    }

    fn provenance_mut(&mut self) -> &mut Provenance {
        // Untagged messages are attributed to the supervisor boundary until a
        // node claims them with `from_node`.
        self.provenance
            .get_or_insert_with(|| Provenance::new(NodeId::Supervisor))
    }
}

/// Metadata describing where a message came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// The graph node that produced the message.
    pub from: NodeId,

    /// Whether this is the final answer of a run.
    #[serde(default, rename = "final")]
    pub is_final: bool,

    /// Whether the message reports a failure that was recovered locally.
    #[serde(default)]
    pub error: bool,

    /// Validator verdict, for messages produced by a validator node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,

    /// The agent mode of the run that produced a final answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_mode: Option<AgentMode>,

    /// For supervisor directives: the node name of the next agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_agent: Option<String>,
}

impl Provenance {
    /// Provenance with only the producing node set.
    pub fn new(from: NodeId) -> Self {
        Self {
            from,
            is_final: false,
            error: false,
            verdict: None,
            agent_mode: None,
            next_agent: None,
        }
    }
}

/// Judgement emitted by a validator node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    /// Plan validator outcome.
    Plan {
        validated: bool,
        error: bool,
        #[serde(default)]
        reason: String,
    },
    /// Step validator outcome.
    Step {
        #[serde(rename = "final")]
        is_final: bool,
        #[serde(default)]
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier assigned by the model for correlating results.
    pub id: String,

    /// The name of the tool to invoke (must match a registered tool).
    pub name: String,

    /// Arguments as a JSON value.  The structure depends on the tool's schema.
    #[serde(default)]
    pub args: Value,
}

/// A tool definition exposed to the model so it knows what tools exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    #[serde(default)]
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Model response
// ---------------------------------------------------------------------------

/// Token usage reported by the model for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated by the model.
    pub completion_tokens: u32,
}

/// The response from a single model invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    /// Text produced by the model (may be empty when only tools are called).
    pub content: String,

    /// Tool calls the model wants executed before it continues.
    pub tool_calls: Vec<ToolCall>,

    /// Token usage for the call.
    pub usage: TokenUsage,
}

impl ModelResponse {
    /// A plain text response.
    pub fn text(content: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage,
        }
    }

    /// Whether the model requested tools.
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
