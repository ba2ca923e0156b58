//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Berth - disposable service containers for development and tests.
#[derive(Parser, Debug, Clone)]
#[command(name = "berth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML).
    #[arg(short, long, env = "BERTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List available services.
    Services,

    /// Start a service and keep it running until interrupted.
    Up(UpArgs),
}

/// Arguments for the up command.
#[derive(Parser, Debug, Clone)]
pub struct UpArgs {
    /// Service reference, `name` or `name:tag`.
    #[arg(required = true)]
    pub service: String,

    /// Init script resource to run once the service is ready.
    #[arg(short, long, value_name = "NAME")]
    pub init_script: Option<String>,

    /// Startup attempts before giving up.
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub attempts: Option<u32>,

    /// Readiness timeout per attempt, in seconds.
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<u64>,
}
