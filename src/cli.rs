// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `agentcoord`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "agentcoord",
    version,
    about = "Coordinate worker agents through multi-step workflows backed by a shared store.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `AGENTCOORD_CONFIG`, else `Agentcoord.toml` in the current
    /// working directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Exit once no running workflow can make further progress.
    #[arg(long)]
    pub once: bool,

    /// Start a workflow of this type before entering the loop. Repeatable.
    #[arg(long = "start", value_name = "TYPE")]
    pub start: Vec<String>,

    /// JSON object passed as context to every workflow started with
    /// `--start`.
    #[arg(long, value_name = "JSON", default_value = "{}")]
    pub context: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `AGENTCOORD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print workers and workflows, but don't execute
    /// anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
