//! CLI entry point for Cadence.
//!
//! The `cadence` binary validates configuration files and evaluates the
//! routing function against saved run states, which makes it useful for
//! debugging a run that took an unexpected path.

mod cli;
mod helpers;

use std::path::Path;

use anyhow::Result;
use cadence_agent::routing::DEFAULT_EDGES;
use cadence_agent::{Capability, ModelRouter, route};
use clap::Parser;
use serde_json::json;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::helpers::{init_tracing, load_config, read_state, render_edge};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::CheckConfig { path, no_env } => cmd_check_config(&path, !no_env),
        Commands::Route { state, config } => cmd_route(&state, config.as_deref()),
        Commands::Edges => cmd_edges(),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: check-config
// ---------------------------------------------------------------------------

fn cmd_check_config(path: &Path, with_env: bool) -> Result<()> {
    let config = load_config(Some(path), with_env)?;
    let router = ModelRouter::from_config(&config.models);

    info!(
        path = %path.display(),
        mode = ?config.run.agent_mode(),
        "configuration is valid"
    );

    let capabilities = [
        Capability::Planning,
        Capability::Execution,
        Capability::Validation,
        Capability::Summarization,
        Capability::Routing,
    ];
    let models: serde_json::Map<String, serde_json::Value> = capabilities
        .iter()
        .map(|capability| {
            let model = router
                .select(*capability)
                .map(|m| json!(format!("{}/{}", m.provider, m.model)))
                .unwrap_or(serde_json::Value::Null);
            (format!("{capability:?}").to_lowercase(), model)
        })
        .collect();

    let mode = config.run.agent_mode();
    let report = json!({
        "agent_mode": mode,
        "run": config.run,
        "models": models,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: route
// ---------------------------------------------------------------------------

fn cmd_route(state_path: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path, true)?;
    let state = read_state(state_path)?;
    let next = route(&state, &config.run);

    info!(next = %next, graph_step = state.current_graph_step, "route evaluated");

    let report = json!({
        "next": next,
        "last_node": state.last_node,
        "current_graph_step": state.current_graph_step,
        "max_graph_steps": config.run.max_graph_steps,
        "current_step_index": state.current_step_index,
        "retry_count": state.retry_count,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: edges
// ---------------------------------------------------------------------------

fn cmd_edges() -> Result<()> {
    for (from, edge) in DEFAULT_EDGES {
        println!("{}", render_edge(*from, *edge));
    }
    Ok(())
}
