// src/engine/mod.rs

//! Orchestration of one sweep run.
//!
//! Preparation (adapter, model, jobs, signature) is pure and lives in
//! [`plan`]; the async shell that talks to the supervisor, the line
//! protocol and the cancellation controller is in [`orchestrator`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::artifacts::DEFAULT_PATTERN;
use crate::backend::WorkerSettings;
use crate::cancel::CancelOptions;
use crate::errors::SweepError;
use crate::sweep::{AxisOrder, SweepSpec};
use crate::worker::Readiness;

pub mod orchestrator;
pub mod plan;

pub use orchestrator::Orchestrator;
pub use plan::RunPlan;

/// Per-run timing and output options.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub ready_timeout: Duration,
    /// Fail when the worker is silent this long while jobs are pending.
    pub idle_timeout: Duration,
    /// Overrides the backend's pacing between commands.
    pub command_interval: Option<Duration>,
    pub artifact_pattern: String,
    /// Post-processing keeps originals, doubling the image estimate.
    pub post_doubling: bool,
    pub cancel: CancelOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(600),
            command_interval: None,
            artifact_pattern: DEFAULT_PATTERN.to_string(),
            post_doubling: false,
            cancel: CancelOptions::default(),
        }
    }
}

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub sweep: SweepSpec,
    pub order: AxisOrder,
    pub worker: WorkerSettings,
    pub options: RunOptions,
}

#[derive(Debug)]
pub enum RunStatus {
    Completed,
    Canceled { reason: String },
    Failed(SweepError),
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Canceled { reason } => write!(f, "canceled ({reason})"),
            RunStatus::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Terminal result of a run.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub total_jobs: usize,
    pub sent: usize,
    pub rejected: usize,
    pub completed: usize,
    pub readiness: Option<Readiness>,
    /// Recent worker output, oldest first.
    pub log: Vec<String>,
    pub artifacts: Vec<PathBuf>,
    pub elapsed: Duration,
}

impl RunReport {
    fn new() -> Self {
        Self {
            status: RunStatus::Completed,
            total_jobs: 0,
            sent: 0,
            rejected: 0,
            completed: 0,
            readiness: None,
            log: Vec::new(),
            artifacts: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self.status, RunStatus::Canceled { .. })
    }
}
