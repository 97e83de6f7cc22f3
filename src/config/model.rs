// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::backend::WorkerSettings;
use crate::engine::{RunOptions, RunRequest};
use crate::sweep::{Axis, AxisOrder, SweepSpec};
use crate::types::{BackendKind, ImageMode, SeamlessMode, SymmetryMode};

/// Run file as read from TOML, before validation.
///
/// ```toml
/// [worker]
/// backend = "invoke"
/// model = "sd-1.5"
///
/// [run]
/// idle_timeout = "600s"
///
/// [[sweep]]
/// prompts = ["a cat", "a dog"]
/// steps = "20, 30"
/// seed = 100
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawRunFile {
    #[serde(default)]
    pub worker: RawWorkerSection,

    #[serde(default)]
    pub run: RawRunSection,

    /// `[[sweep]]` entries, run in file order.
    #[serde(default)]
    pub sweep: Vec<RawSweep>,
}

/// `[worker]` section: everything that affects the worker's startup.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkerSection {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub models_dir: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub device_index: u32,
    #[serde(default)]
    pub clip_skip: u32,
    #[serde(default)]
    pub optimize: bool,
    /// Regex replacing the backend's readiness marker.
    #[serde(default)]
    pub ready_pattern: Option<String>,
}

fn default_program() -> String {
    "python".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

impl Default for RawWorkerSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            program: default_program(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            model: String::new(),
            models_dir: None,
            output_dir: default_output_dir(),
            device_index: 0,
            clip_skip: 0,
            optimize: false,
            ready_pattern: None,
        }
    }
}

/// `[run]` section. Durations are strings like `"500ms"` or `"2m"`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRunSection {
    #[serde(default)]
    pub ready_timeout: Option<String>,
    #[serde(default)]
    pub idle_timeout: Option<String>,
    #[serde(default)]
    pub command_interval: Option<String>,
    /// Give up on a soft cancel after this long.
    #[serde(default)]
    pub cancel_timeout: Option<String>,
    #[serde(default)]
    pub artifact_pattern: Option<String>,
    #[serde(default)]
    pub post_doubling: bool,
}

/// A value list given either as a TOML array or in the text syntax
/// (`"20, 30"`, `"5 > 9 2"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ValueList {
    Numbers(Vec<f64>),
    Text(String),
}

impl Default for ValueList {
    fn default() -> Self {
        ValueList::Numbers(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFineTune {
    pub name: String,
    #[serde(default)]
    pub weights: ValueList,
}

/// One `[[sweep]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSweep {
    #[serde(default)]
    pub prompts: Vec<String>,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default)]
    pub steps: ValueList,
    #[serde(default)]
    pub scales: ValueList,
    #[serde(default)]
    pub refiner_strengths: ValueList,
    #[serde(default)]
    pub init_images: Vec<PathBuf>,
    #[serde(default)]
    pub init_strengths: ValueList,
    #[serde(default)]
    pub fine_tunes: Vec<RawFineTune>,
    #[serde(default)]
    pub seed: i64,
    #[serde(default)]
    pub lock_seed: bool,
    #[serde(default = "default_side")]
    pub width: u32,
    #[serde(default = "default_side")]
    pub height: u32,
    #[serde(default)]
    pub sampler: Option<String>,

    #[serde(default)]
    pub seamless: SeamlessMode,
    #[serde(default)]
    pub symmetry: SymmetryMode,
    #[serde(default)]
    pub hires_fix: bool,
    #[serde(default)]
    pub perlin: f32,
    #[serde(default)]
    pub threshold: u32,
    #[serde(default)]
    pub image_mode: ImageMode,
    #[serde(default)]
    pub mask_path: Option<PathBuf>,
    #[serde(default)]
    pub text_mask: Option<String>,
    #[serde(default)]
    pub append_args: String,

    /// Outermost first; missing axes are nested innermost.
    #[serde(default)]
    pub axis_order: Vec<Axis>,
    /// Defaults to `["prompt"]`.
    #[serde(default)]
    pub seed_reset: Option<Vec<Axis>>,
    /// Defaults to `["iteration"]`.
    #[serde(default)]
    pub seed_increment: Option<Vec<Axis>>,
}

fn default_iterations() -> u32 {
    1
}

fn default_side() -> u32 {
    512
}

/// A validated sweep together with its nesting order.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepEntry {
    pub sweep: SweepSpec,
    pub order: AxisOrder,
}

/// Validated run file.
///
/// Constructed through `TryFrom<RawRunFile>` (see `validate.rs`), so the
/// fields can be trusted by the engine.
#[derive(Debug, Clone)]
pub struct RunFile {
    pub worker: WorkerSettings,
    pub options: RunOptions,
    pub sweeps: Vec<SweepEntry>,
}

impl RunFile {
    /// Replace the configured backend (CLI override).
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.worker.backend = backend;
        self
    }

    /// One request per sweep, sharing worker settings and options.
    pub fn requests(&self) -> Vec<RunRequest> {
        self.sweeps
            .iter()
            .map(|entry| RunRequest {
                sweep: entry.sweep.clone(),
                order: entry.order.clone(),
                worker: self.worker.clone(),
                options: self.options.clone(),
            })
            .collect()
    }
}
