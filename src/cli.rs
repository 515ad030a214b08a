//! Command-line interface for cyfire.
use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" | "err" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => return Err(format!("invalid log level '{trimmed}'")),
        };

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for cyfire.
#[derive(Parser)]
#[command(name = "cyfire", version, author)]
#[command(
    about = "Starts a companion server or Firebase emulators, waits until they answer, runs Cypress, then cleans up",
    long_about = None
)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Path to the workspace file (defaults to `workspace.yaml`).
    #[arg(short, long, value_name = "FILE", global = true)]
    pub workspace: Option<PathBuf>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Arguments shared by every executor.
#[derive(Args, Debug, Clone)]
pub struct ExecutorArgs {
    /// Project the executor runs for.
    #[arg(short, long)]
    pub project: String,

    /// Executor options file (YAML or JSON).
    #[arg(short, long, value_name = "FILE")]
    pub options: Option<PathBuf>,

    /// Configuration of the invoking target.
    #[arg(short, long)]
    pub configuration: Option<String>,

    /// Do not read or write cached companion metadata.
    #[arg(long)]
    pub no_cache: bool,
}

/// Available commands for cyfire.
#[derive(Subcommand)]
pub enum Commands {
    /// Serve the companion and run Cypress headlessly.
    Run(ExecutorArgs),

    /// Like `run`, tuned for CI.
    #[command(name = "e2e-ci")]
    E2eCi(ExecutorArgs),

    /// Serve the companion and open the interactive Cypress runner.
    Open(ExecutorArgs),

    /// Start the Firebase emulators, then the base serve target in the foreground.
    Serve(ExecutorArgs),

    /// Start the Firebase emulators and keep them running until they exit.
    Emulators(ExecutorArgs),

    /// Run `firebase deploy` in the foreground.
    Deploy(ExecutorArgs),

    /// Force-free a local port by killing whatever is bound to it.
    Reclaim {
        /// Port to free.
        port: u16,

        /// Look for UDP sockets instead of TCP.
        #[arg(long)]
        udp: bool,
    },

    /// Check whether a URL or local port answers.
    Probe {
        /// URL or bare port number.
        endpoint: String,

        /// Keep polling up to this many milliseconds instead of probing once.
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Delay between probes in milliseconds.
        #[arg(long, value_name = "MS")]
        poll_interval_ms: Option<u64>,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
