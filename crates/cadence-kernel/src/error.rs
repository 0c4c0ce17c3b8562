//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every public API in this crate.  Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

/// Unified error type for the Cadence kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Registry errors ----------------------------------------------------
    /// The requested agent is not registered.
    #[error("agent not found: {agent_id}")]
    AgentNotFound {
        /// The external identifier that was looked up.
        agent_id: String,
    },

    /// No agent is registered under the given routable node name.
    #[error("no agent registered for node: {node}")]
    NodeNotFound { node: String },

    /// The agent identifier cannot be turned into a routable node name.
    #[error("invalid agent id `{agent_id}`: {reason}")]
    InvalidAgentId { agent_id: String, reason: String },

    /// The registry lock was poisoned by a panicking writer.
    #[error("registry lock poisoned")]
    LockPoisoned,

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
