// src/backend/mod.rs

//! Backend adapters: everything that differs between worker
//! implementations.
//!
//! The rest of the crate only talks to [`BackendAdapter`]; adding a backend
//! means adding one implementation here and one arm in [`adapter_for`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{Result, SweepError};
use crate::fs::FileSystem;
use crate::output::markers::{LineMarkers, MarkerKind};
use crate::sweep::{Job, SweepSpec};
use crate::types::BackendKind;

pub mod invoke;
pub mod quote;
pub mod xl;

pub use invoke::InvokeAdapter;
pub use xl::XlAdapter;

/// Startup settings of the worker process.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub backend: BackendKind,
    /// Executable to launch (e.g. `python`).
    pub program: String,
    /// Arguments placed before the backend's own startup arguments.
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Model identifier; a file name below `models_dir` when that is set.
    pub model: String,
    pub models_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub device_index: u32,
    pub clip_skip: u32,
    /// Backend-specific memory optimisation switch.
    pub optimize: bool,
    /// Overrides the backend's readiness marker.
    pub ready_pattern: Option<String>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            program: "python".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            model: String::new(),
            models_dir: None,
            output_dir: PathBuf::from("out"),
            device_index: 0,
            clip_skip: 0,
            optimize: false,
            ready_pattern: None,
        }
    }
}

/// A model after resolution against the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// Identifier passed to the worker.
    pub id: String,
    pub path: Option<PathBuf>,
    /// Second-stage model found next to the base model, if any.
    pub refiner: Option<PathBuf>,
}

/// Fingerprint of every setting that requires a worker restart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerSignature(String);

impl WorkerSignature {
    /// Digest of the given components; the order is significant.
    pub fn from_components<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hasher = blake3::Hasher::new();
        for component in components {
            hasher.update(component.as_ref().trim().as_bytes());
            hasher.update(&[0]);
        }
        WorkerSignature(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for logs.
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

/// Everything needed to spawn the worker process.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " {}", quote::quote(arg))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Behaviour that differs per worker implementation.
pub trait BackendAdapter: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Resolve the configured model. Fails with `ModelResolutionFailed`.
    fn resolve(&self, worker: &WorkerSettings, fs: &dyn FileSystem) -> Result<ResolvedModel>;

    /// Protocol line for one job. Never contains a newline.
    fn build_command(&self, job: &Job, sweep: &SweepSpec) -> String;

    /// Reject jobs the worker cannot run.
    fn validate(&self, job: &Job, sweep: &SweepSpec) -> std::result::Result<(), String>;

    fn signature(
        &self,
        sweep: &SweepSpec,
        worker: &WorkerSettings,
        model: &ResolvedModel,
    ) -> WorkerSignature;

    /// Backend arguments appended after `worker.args`.
    fn startup_args(
        &self,
        sweep: &SweepSpec,
        worker: &WorkerSettings,
        model: &ResolvedModel,
    ) -> Vec<String>;

    /// Commands sent to a reused worker before the first job.
    fn reuse_commands(&self, _model: &ResolvedModel) -> Vec<String> {
        Vec::new()
    }

    /// Minimum delay between two protocol lines.
    fn command_interval(&self) -> Duration {
        Duration::ZERO
    }

    fn markers(&self) -> &LineMarkers;

    fn recognized(&self) -> std::collections::BTreeSet<MarkerKind> {
        self.markers().recognized()
    }

    fn launch_spec(
        &self,
        sweep: &SweepSpec,
        worker: &WorkerSettings,
        model: &ResolvedModel,
    ) -> LaunchSpec {
        let mut args = worker.args.clone();
        args.extend(self.startup_args(sweep, worker, model));

        let mut env = worker.env.clone();
        env.entry("CUDA_VISIBLE_DEVICES".to_string())
            .or_insert_with(|| worker.device_index.to_string());

        LaunchSpec {
            program: worker.program.clone(),
            args,
            env,
            working_dir: worker.working_dir.clone(),
        }
    }
}

/// Construct the adapter for `worker.backend`, applying marker overrides.
pub fn adapter_for(worker: &WorkerSettings) -> Result<Arc<dyn BackendAdapter>> {
    let map_err = |e: regex::Error| SweepError::ConfigError(format!("invalid marker pattern: {e}"));

    let adapter: Arc<dyn BackendAdapter> = match worker.backend {
        BackendKind::Invoke => {
            let mut adapter = InvokeAdapter::new().map_err(map_err)?;
            if let Some(pattern) = &worker.ready_pattern {
                adapter = adapter.with_ready_pattern(pattern).map_err(map_err)?;
            }
            Arc::new(adapter)
        }
        BackendKind::Xl => {
            let mut adapter = XlAdapter::new().map_err(map_err)?;
            if let Some(pattern) = &worker.ready_pattern {
                adapter = adapter.with_ready_pattern(pattern).map_err(map_err)?;
            }
            Arc::new(adapter)
        }
    };
    Ok(adapter)
}
