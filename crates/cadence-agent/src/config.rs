//! Run configuration.
//!
//! A [`RunConfig`] is fixed for the lifetime of a run.  It can be built in
//! code, or loaded as part of a [`CadenceConfig`] from a TOML (or JSON, by
//! extension) file and then overridden by `CADENCE_*` environment variables:
//!
//! | Variable | Field |
//! |---|---|
//! | `CADENCE_MAX_GRAPH_STEPS` | `run.max_graph_steps` |
//! | `CADENCE_SHORT_TERM_MEMORY_WINDOW` | `run.short_term_memory_window` |
//! | `CADENCE_MEMORY_BUDGET_TOKENS` | `run.memory_budget_tokens` |
//! | `CADENCE_HUMAN_IN_THE_LOOP` | `run.human_in_the_loop_enabled` |
//! | `CADENCE_THREAD_ID` | `run.thread_id` |
//! | `CADENCE_RETRY_CEILING` | `run.retry_ceiling` |
//! | `CADENCE_CALL_TIMEOUT_SECS` | `run.call_timeout_secs` |
//! | `CADENCE_RAG_SCOPE` | `run.rag_scope` |

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AgentError, Result};
use crate::llm::router::ModelRoutingConfig;

/// Default completion-token budget before history is compacted.
pub const DEFAULT_MEMORY_BUDGET_TOKENS: u32 = 11_000;

/// Default number of failed validations tolerated before a run ends.
pub const DEFAULT_RETRY_CEILING: u32 = 5;

const ENV_PREFIX: &str = "CADENCE_";

// ---------------------------------------------------------------------------
// Agent mode
// ---------------------------------------------------------------------------

/// Whether a run may pause for human input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Runs start to finish without human input.
    Autonomous,
    /// Human-in-the-loop steps suspend the run until input is supplied.
    Hybrid,
}

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

/// Immutable per-run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of node executions before the run is forced to end.
    pub max_graph_steps: u32,

    /// Number of most recent messages included in executor and validator
    /// prompts.
    pub short_term_memory_window: usize,

    /// Completion-token budget that triggers history compaction.
    pub memory_budget_tokens: u32,

    /// Enables hybrid mode: human-in-the-loop steps suspend the run.
    pub human_in_the_loop_enabled: bool,

    /// Key under which suspended runs are checkpointed.  Generated when empty.
    pub thread_id: String,

    /// Failed validations tolerated before the run ends.
    pub retry_ceiling: u32,

    /// Optional per-call timeout for model and tool calls.
    pub call_timeout_secs: Option<u64>,

    /// Retrieval corpus used to fill `rag_context`; `None` disables RAG.
    pub rag_scope: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_graph_steps: 50,
            short_term_memory_window: 20,
            memory_budget_tokens: DEFAULT_MEMORY_BUDGET_TOKENS,
            human_in_the_loop_enabled: false,
            thread_id: String::new(),
            retry_ceiling: DEFAULT_RETRY_CEILING,
            call_timeout_secs: None,
            rag_scope: None,
        }
    }
}

impl RunConfig {
    /// The agent mode implied by `human_in_the_loop_enabled`.
    pub fn agent_mode(&self) -> AgentMode {
        if self.human_in_the_loop_enabled {
            AgentMode::Hybrid
        } else {
            AgentMode::Autonomous
        }
    }

    /// The per-call timeout, if configured.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }

    /// Builder: set the thread id.
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    /// Builder: set the graph step budget.
    pub fn with_max_graph_steps(mut self, max_graph_steps: u32) -> Self {
        self.max_graph_steps = max_graph_steps;
        self
    }

    /// Builder: enable or disable hybrid mode.
    pub fn with_human_in_the_loop(mut self, enabled: bool) -> Self {
        self.human_in_the_loop_enabled = enabled;
        self
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_graph_steps < 1 {
            return Err(AgentError::ConfigError {
                reason: "max_graph_steps must be at least 1".into(),
            });
        }
        if self.short_term_memory_window < 1 {
            return Err(AgentError::ConfigError {
                reason: "short_term_memory_window must be at least 1".into(),
            });
        }
        if self.retry_ceiling < 1 {
            return Err(AgentError::ConfigError {
                reason: "retry_ceiling must be at least 1".into(),
            });
        }
        if self.call_timeout_secs == Some(0) {
            return Err(AgentError::ConfigError {
                reason: "call_timeout_secs must be positive when set".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File configuration
// ---------------------------------------------------------------------------

/// Top-level configuration file: run settings plus model routing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Per-run settings.
    #[serde(default)]
    pub run: RunConfig,

    /// Capability → model routing table.
    #[serde(default)]
    pub models: ModelRoutingConfig,
}

impl CadenceConfig {
    /// Load a configuration file.  `.json` files are parsed as JSON,
    /// everything else as TOML.  The result is validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to read config file {}: {e}", path.display()),
        })?;

        let config: Self = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(|e| AgentError::ConfigError {
                reason: format!("failed to parse JSON config: {e}"),
            })?
        } else {
            toml::from_str(&content)?
        };

        config.run.validate()?;
        info!(path = %path.display(), "configuration loaded from file");
        Ok(config)
    }

    /// Apply `CADENCE_*` overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(std::env::vars())
    }

    /// Apply `CADENCE_*` overrides from the given variables.  Unrelated
    /// variables are ignored; malformed values are errors.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let run = &mut self.run;
            match name {
                "MAX_GRAPH_STEPS" => run.max_graph_steps = parse_env(&key, &value)?,
                "SHORT_TERM_MEMORY_WINDOW" => {
                    run.short_term_memory_window = parse_env(&key, &value)?;
                }
                "MEMORY_BUDGET_TOKENS" => run.memory_budget_tokens = parse_env(&key, &value)?,
                "HUMAN_IN_THE_LOOP" => run.human_in_the_loop_enabled = parse_env(&key, &value)?,
                "THREAD_ID" => run.thread_id = value,
                "RETRY_CEILING" => run.retry_ceiling = parse_env(&key, &value)?,
                "CALL_TIMEOUT_SECS" => run.call_timeout_secs = Some(parse_env(&key, &value)?),
                "RAG_SCOPE" => run.rag_scope = Some(value),
                _ => {
                    debug!(key = %key, "ignoring unknown cadence environment variable");
                    continue;
                }
            }
            debug!(key = %key, "applied environment override");
        }

        self.run.validate()
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| AgentError::ConfigError {
        reason: format!("invalid value for {key}: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
