// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Variants fall in two groups:
//! - run failures (`ModelResolutionFailed`, `WorkerStartupFailed`,
//!   `WorkerUnexpectedExit`, ...), which end a run and leave the worker
//!   stopped;
//! - local conditions (`InvalidJob`) that are logged and skipped by the
//!   driver.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("model could not be resolved: {0}")]
    ModelResolutionFailed(String),

    #[error("worker failed to start: {0}")]
    WorkerStartupFailed(String),

    #[error("job {index} rejected: {reason}")]
    InvalidJob { index: usize, reason: String },

    #[error("no valid commands were sent to the worker")]
    NoValidCommands,

    #[error("worker exited unexpectedly (exit code {code:?}) while on job {job_index}")]
    WorkerUnexpectedExit { job_index: usize, code: Option<i32> },

    #[error("worker produced no output for {0:?}")]
    WorkerIdle(Duration),

    #[error("soft cancel did not quiesce within {0:?}")]
    CancellationTimeout(Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SweepError {
    /// Whether this error ends the whole run (as opposed to a single job).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SweepError::InvalidJob { .. } | SweepError::NoValidCommands)
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SweepError>;
