//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "culture", version, about = "Continuous-culture controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/culture.toml")]
    pub config: PathBuf,

    /// Log as JSON lines and print results as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured experiment against the simulated rig
    Run {
        /// Stop after this many telemetry ticks (default: until Ctrl-C)
        #[arg(long, value_name = "N")]
        ticks: Option<u64>,
    },
    /// Replay the journal and print per-vial controller state
    Status,
    /// Validate the config and pump calibration without running anything
    Check,
    /// Stop every pump, then run every line once to fill the tubing
    Prime {
        /// Seconds each pump runs
        #[arg(long, value_name = "SECS", default_value_t = 10.0)]
        seconds: f64,
    },
}
