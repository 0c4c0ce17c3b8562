//! Shared helpers for the CLI subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use cadence_agent::routing::Edge;
use cadence_agent::{CadenceConfig, NodeId, RunState};
use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the global tracing subscriber.  `RUST_LOG` wins over
/// `default_level`.
pub fn init_tracing(default_level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Load a configuration file, optionally applying `CADENCE_*` overrides.
pub fn load_config(path: Option<&Path>, with_env: bool) -> Result<CadenceConfig> {
    let mut config = match path {
        Some(path) => CadenceConfig::load(path)
            .with_context(|| format!("invalid configuration in {}", path.display()))?,
        None => CadenceConfig::default(),
    };
    if with_env {
        config
            .apply_process_env()
            .context("invalid CADENCE_* environment override")?;
    }
    Ok(config)
}

/// Read a serialized run state.
pub fn read_state(path: &Path) -> Result<RunState> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a run state", path.display()))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// One line per default transition, e.g. `planner -> planner_validator`.
pub fn render_edge(from: Option<NodeId>, edge: Edge) -> String {
    let from = from.map_or("(start)", NodeId::as_str);
    let to = match edge {
        Edge::To(node) => node.as_str().to_owned(),
        Edge::PlanVerdict => "executor | planner | end (plan verdict)".to_owned(),
        Edge::StepVerdict => "adaptive_planner | executor | end (step verdict)".to_owned(),
    };
    format!("{from} -> {to}")
}
