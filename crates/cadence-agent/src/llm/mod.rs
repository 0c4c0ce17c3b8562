//! Model integration layer.
//!
//! This module provides the interface between graph nodes and whatever model
//! provider the host application plugs in.  It is organized into:
//!
//! - [`types`] -- Core data types (messages, provenance, tool calls, usage).
//! - [`provider`] -- The [`ModelProvider`] contract and structured output.
//! - [`router`] -- Capability-based model selection.

pub mod provider;
pub mod router;
pub mod types;

// Re-export the most commonly used types for convenience.
pub use provider::{
    Capability, InvokeOptions, ModelHandle, ModelProvider, StructuredSchema, invoke_structured,
};
pub use router::{ModelConfig, ModelRouter, ModelRoutingConfig};
pub use types::{
    Message, ModelResponse, Provenance, Role, TokenUsage, ToolCall, ToolDefinition, Verdict,
};
