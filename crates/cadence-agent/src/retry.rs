//! Bounded retry policy shared by the plan and step validators.

use crate::config::RunConfig;
use crate::state::RunState;

/// Failed-validation counter with a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub count: u32,
    pub ceiling: u32,
}

impl RetryPolicy {
    /// The policy in effect for `state` under `config`.
    pub fn of(state: &RunState, config: &RunConfig) -> Self {
        Self {
            count: state.retry_count,
            ceiling: config.retry_ceiling,
        }
    }

    /// Whether no further retries are allowed.
    pub fn exhausted(&self) -> bool {
        self.count >= self.ceiling
    }

    /// Counter value after one more failed validation.
    pub fn after_failure(&self) -> u32 {
        self.count.saturating_add(1)
    }

    /// Counter value after a successful validation.
    pub fn after_success(&self) -> u32 {
        0
    }
}
