// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::default_config_path;
use crate::types::BackendKind;

/// Command-line arguments for `sdsweep`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sdsweep",
    version,
    about = "Run parameter sweeps against a long-lived image generation worker.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the run file (TOML).
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SDSWEEP_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Print the expanded jobs and the worker command, launch nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Override `[worker].backend` from the run file.
    #[arg(long, value_enum, value_name = "BACKEND")]
    pub backend: Option<BackendArg>,
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

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Invoke,
    Xl,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Invoke => BackendKind::Invoke,
            BackendArg::Xl => BackendKind::Xl,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
