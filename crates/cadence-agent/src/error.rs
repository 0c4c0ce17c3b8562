//! Agent error types.
//!
//! All engine subsystems surface errors through [`AgentError`].  Each variant
//! carries enough context for callers to decide how to handle the failure.
//!
//! Model-side failures are *recoverable*: graph nodes turn them into
//! error-tagged messages and the run continues (see
//! [`AgentError::is_recoverable`]).  Tool failures and cancellation are not;
//! they propagate to whoever drives the run.

/// Unified error type for the orchestration engine.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Model errors --------------------------------------------------------
    /// No model is configured for the requested capability.
    #[error("no model available for capability: {capability}")]
    ModelUnavailable { capability: String },

    /// The request to the model provider failed.
    #[error("model request failed: {reason}")]
    ModelRequestFailed { reason: String },

    /// The model response could not be parsed into the expected format.
    #[error("model response parse error: {reason}")]
    ModelParseFailed { reason: String },

    /// Structured output did not conform to the requested JSON Schema.
    #[error("structured output for `{schema}` failed validation: {reason}")]
    StructuredOutputInvalid { schema: String, reason: String },

    /// A model or tool call did not finish within the configured timeout.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    // -- Tool errors ---------------------------------------------------------
    /// A tool call referenced by the model does not exist in the registry.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// A tool handler failed.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    // -- Run lifecycle -------------------------------------------------------
    /// The run was cancelled through its cancellation token.
    #[error("run {thread_id} was cancelled")]
    Cancelled { thread_id: String },

    /// `resume` was called for a thread that has no suspended checkpoint.
    #[error("no suspended run for thread {thread_id}")]
    ThreadNotSuspended { thread_id: String },

    // -- Supervisor ----------------------------------------------------------
    /// A sub-agent failed while handling a request.
    #[error("agent `{agent}` failed: {reason}")]
    AgentFailed { agent: String, reason: String },

    // -- Configuration errors ------------------------------------------------
    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the kernel crate.
    #[error("kernel error: {0}")]
    Kernel(#[from] cadence_kernel::KernelError),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether a graph node may recover from this error locally by emitting
    /// an error-tagged message instead of failing the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ModelUnavailable { .. }
                | Self::ModelRequestFailed { .. }
                | Self::ModelParseFailed { .. }
                | Self::StructuredOutputInvalid { .. }
                | Self::Timeout { .. }
        )
    }
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<toml::de::Error> for AgentError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError {
            reason: err.to_string(),
        }
    }
}
