//! Plan-execute-validate orchestration engine for Cadence.
//!
//! A run pursues a goal by planning steps, executing them (possibly through
//! tools), validating each result, and extending the plan until the goal is
//! met or a budget runs out.  History is compacted when it grows past a token
//! budget, and a supervisor can route requests among several such agents.
//!
//! ## Architecture
//!
//! ```text
//!            ┌─────────┐    ┌───────────────────┐
//!  input ───>│ Planner │───>│ Planner Validator │──── rejected ───┐
//!            └────▲────┘    └─────────┬─────────┘                 │
//!                 │                   │ validated                 │
//!                 │             ┌─────▼────┐  tool calls ┌───────┐│
//!                 │             │ Executor │<───────────>│ Tools ││
//!                 │             └─────┬────┘             └───────┘│
//!                 │                   │                           │
//!      ┌──────────┴───────┐  final ┌──▼─────────────┐             │
//!      │ Adaptive Planner │<───────│ Exec Validator │             │
//!      └──────────┬───────┘        └────────────────┘             │
//!                 │ complete                                      │
//!                 └───────────────> End <─────────────────────────┘
//! ```
//!
//! The next node is always chosen by the pure [`routing::route`] function.
//! Nodes return partial [`StateUpdate`]s that the [`Engine`] merges.
//!
//! ## Modules
//!
//! - [`engine`] -- The run loop, suspension and resumption.
//! - [`nodes`] -- Planner, validators, executor, tool invoker, human, end.
//! - [`routing`] -- Transition table and routing markers.
//! - [`state`] -- Run state, plans and partial updates.
//! - [`compaction`] -- Token-budget history compaction.
//! - [`supervisor`] -- Multi-agent routing with a recursion guard.
//! - [`llm`] -- Model provider contract, routing and message types.
//! - [`tools`] / [`memory`] -- Tool registry and memory contracts.
//! - [`config`] -- Run configuration.
//! - [`error`] -- Agent error types.

pub mod checkpoint;
pub mod compaction;
pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod memory;
pub mod nodes;
pub mod retry;
pub mod routing;
pub mod state;
pub mod supervisor;
pub mod tools;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export the most commonly used types at the crate root.
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::{AgentMode, CadenceConfig, RunConfig};
pub use engine::{Engine, RunOutcome};
pub use error::{AgentError, Result};
pub use llm::{
    Capability, InvokeOptions, Message, ModelConfig, ModelHandle, ModelProvider, ModelResponse,
    ModelRouter, ModelRoutingConfig, Provenance, Role, TokenUsage, ToolCall, ToolDefinition,
    Verdict,
};
pub use memory::{KeywordMemory, MemoryEntry, MemoryService};
pub use retry::RetryPolicy;
pub use routing::{REPLAN_MARKER, TERMINAL_MARKER, route};
pub use state::{NodeId, Plan, RunState, StateUpdate, Step, StepKind, StepStatus};
pub use supervisor::{
    AgentHandle, EngineAgent, MAX_EXECUTION_DEPTH, SubAgent, Supervisor, SupervisorContext,
    agent_registry,
};
pub use tools::{AdapterToolRegistry, ToolAdapter, ToolRegistry};
