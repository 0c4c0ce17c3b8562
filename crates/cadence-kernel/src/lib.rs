//! Cadence kernel.
//!
//! Process-wide primitives shared by every orchestration run:
//!
//! - **[`registry`]** -- Agent registry mapping external agent identifiers to
//!   routable node names, with numeric-suffix collision resolution and
//!   single-writer / many-reader locking.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync` when their handle type is.

pub mod error;
pub mod registry;

// Re-export the most commonly used types at the crate root for convenience.
pub use error::{KernelError, Result};
pub use registry::{AgentInfo, AgentRegistry, sanitize_node_name};
