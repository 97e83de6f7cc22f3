// src/logging.rs

//! Logging setup for `sdsweep` using `tracing` + `tracing-subscriber`.
//!
//! The filter comes from, in order:
//! 1. `--log-level` (applies to everything, worker output included)
//! 2. `SDSWEEP_LOG`, an `EnvFilter` directive string such as
//!    `info,worker=debug`
//! 3. `info`
//!
//! Raw worker output is logged at `debug` under the [`WORKER_OUTPUT`]
//! target, so it can be switched on without the rest of the debug noise.
//! Logs go to stderr; stdout is reserved for the run summary and
//! `--dry-run` output.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Target of every line the worker prints.
pub const WORKER_OUTPUT: &str = "worker";

const ENV_VAR: &str = "SDSWEEP_LOG";
const DEFAULT_DIRECTIVES: &str = "info";

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(ENV_VAR).ok();
    let directives = filter_directives(cli_level, env.as_deref());

    fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

/// Directive string for the filter. An unparseable `SDSWEEP_LOG` falls back
/// to the default.
fn filter_directives(cli_level: Option<LogLevel>, env: Option<&str>) -> String {
    if let Some(level) = cli_level {
        return level_name(level).to_string();
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(spec) if EnvFilter::try_new(spec).is_ok() => spec.to_string(),
        Some(spec) => {
            eprintln!("ignoring invalid {ENV_VAR}={spec:?}");
            DEFAULT_DIRECTIVES.to_string()
        }
        None => DEFAULT_DIRECTIVES.to_string(),
    }
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_level_wins_over_environment() {
        assert_eq!(
            filter_directives(Some(LogLevel::Debug), Some("warn")),
            "debug"
        );
    }

    #[test]
    fn environment_directives_can_target_worker_output() {
        assert_eq!(
            filter_directives(None, Some(" info,worker=debug ")),
            "info,worker=debug"
        );
        assert_eq!(filter_directives(None, None), "info");
        assert_eq!(filter_directives(None, Some("")), "info");
        assert_eq!(filter_directives(None, Some("worker=shouty")), "info");
    }
}
