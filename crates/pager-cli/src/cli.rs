//! Command-line argument parsing with clap.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};

/// Pager - escalation chain simulator and inspector.
#[derive(Parser, Debug, Clone)]
#[command(name = "pager")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Log output format (logs go to stderr, filtered by `RUST_LOG`).
    #[arg(long, value_enum, env = "PAGER_LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

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

/// Log format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a scenario file against in-memory collaborators on a virtual clock.
    Simulate(SimulateArgs),

    /// Show a persisted escalation and its health.
    Inspect(InspectArgs),
}

/// Arguments for the simulate command.
#[derive(Parser, Debug, Clone)]
pub struct SimulateArgs {
    /// Scenario file (JSON).
    #[arg(required = true)]
    pub scenario: PathBuf,

    /// Stop the virtual clock at this time (RFC 3339); overrides the scenario.
    #[arg(long)]
    pub until: Option<DateTime<Utc>>,

    /// Persist escalation documents to this directory.
    #[arg(long, env = "PAGER_STORE_DIR")]
    pub store_dir: Option<PathBuf>,
}

/// Arguments for the inspect command.
#[derive(Parser, Debug, Clone)]
pub struct InspectArgs {
    /// Alert group to inspect.
    #[arg(required = true)]
    pub alert_group: String,

    /// Directory holding escalation documents.
    #[arg(long, env = "PAGER_STORE_DIR")]
    pub store_dir: PathBuf,

    /// Evaluate health at this time (RFC 3339) instead of now.
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}
