//! CLI argument definitions for Cadence.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Cadence -- plan-execute-validate orchestration engine.
#[derive(Parser)]
#[command(
    name = "cadence",
    version,
    about = "Cadence -- plan-execute-validate orchestration engine",
    long_about = "Offline tools for Cadence deployments: validate configuration files and \
                  evaluate the routing function against saved run states."
)]
pub struct Cli {
    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration file and print the effective settings.
    CheckConfig {
        /// Path to a TOML (or `.json`) configuration file.
        path: PathBuf,

        /// Ignore `CADENCE_*` environment overrides.
        #[arg(long)]
        no_env: bool,
    },

    /// Print the node that would run next for a saved run state.
    Route {
        /// JSON file holding a serialized run state.
        #[arg(long, short)]
        state: PathBuf,

        /// Configuration file; defaults apply when omitted.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// List the graph's default transitions.
    Edges,
}
