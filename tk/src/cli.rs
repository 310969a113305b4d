//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// TaskKeeper - bounded-concurrency keeper for due tasks
#[derive(Debug, Parser)]
#[command(
    name = "tk",
    about = "Runs due tasks through a bounded-concurrency execution queue",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Maximum concurrent executions (overrides config and MAX_CONCURRENT_EXECUTIONS)
    #[arg(short = 'j', long = "max-concurrent", global = true)]
    pub max_concurrent: Option<usize>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll for due tasks until SIGINT/SIGTERM, then drain
    Run,

    /// Run a single cycle with the simulated executor and print the report
    Cycle {
        /// Task identifiers to run
        #[arg(required = true, value_name = "ID")]
        ids: Vec<String>,

        /// Make the simulated executor fail for this identifier (repeatable)
        #[arg(long = "fail", value_name = "ID")]
        fail: Vec<String>,

        /// Simulated execution time per task
        #[arg(long, default_value = "0")]
        delay_ms: u64,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Output format for cycle reports
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
