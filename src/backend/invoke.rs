// src/backend/invoke.rs

//! Adapter for the CLI-flag worker (`"prompt" -W 512 -H 512 -S 42 ...`).

use std::time::Duration;

use tracing::debug;

use crate::backend::quote::{quote, quote_path, single_line};
use crate::backend::{BackendAdapter, ResolvedModel, WorkerSettings, WorkerSignature};
use crate::errors::{Result, SweepError};
use crate::fs::FileSystem;
use crate::output::markers::LineMarkers;
use crate::sweep::values::format_number;
use crate::sweep::{Job, SweepSpec};
use crate::types::{BackendKind, ImageMode, SeamlessMode, SymmetryMode};

const READY: &str = r"(?i)(textual inversion triggers|initialization done)";
const MODEL_LOADED: &str = r"(?i)model loaded in";
const PROGRESS: &str = r"(\d+)%\|";
const COMPLETION: &str = r"(?P<count>\d+) image\(s\) generated in (?P<secs>[\d.]+)s";
const ERROR: &str = r"(?i)error occurred";

/// Resolution granularity the worker accepts.
const RES_STEP: u32 = 64;

#[derive(Debug, Clone)]
pub struct InvokeAdapter {
    markers: LineMarkers,
}

impl InvokeAdapter {
    pub fn new() -> std::result::Result<Self, regex::Error> {
        let markers = LineMarkers::new(READY)?
            .with_model_loaded(MODEL_LOADED)?
            .with_progress(PROGRESS, None)?
            .with_completion(COMPLETION)?
            .with_error(ERROR)?;
        Ok(Self { markers })
    }

    pub fn with_ready_pattern(mut self, pattern: &str) -> std::result::Result<Self, regex::Error> {
        self.markers = self.markers.with_readiness(pattern)?;
        Ok(self)
    }

    /// Prompt text with fine-tune tokens and the bracketed negative prompt.
    fn full_prompt(&self, job: &Job, sweep: &SweepSpec) -> String {
        let mut prompt = sweep.prompt_with_weight(&job.prompt, job.fine_tune_weight);

        match sweep.fine_tunes.as_slice() {
            [] => {}
            [single] => {
                let weight = job.fine_tune_weight.unwrap_or(1.0);
                prompt.push_str(&format!(" withLora({},{})", single.name, format_number(weight, 1, 4)));
            }
            many => {
                for entry in many {
                    let weight = entry.weights.first().copied().unwrap_or(1.0);
                    prompt.push_str(&format!(" withLora({},{})", entry.name, format_number(weight, 1, 4)));
                }
            }
        }

        let negative = sweep.negative_prompt.trim();
        if !negative.is_empty() {
            prompt.push_str(&format!(" [{negative}]"));
        }
        prompt
    }
}

impl BackendAdapter for InvokeAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Invoke
    }

    fn resolve(&self, worker: &WorkerSettings, fs: &dyn FileSystem) -> Result<ResolvedModel> {
        let model = worker.model.trim();
        if model.is_empty() {
            return Err(SweepError::ModelResolutionFailed(
                "no model configured".to_string(),
            ));
        }

        let Some(dir) = &worker.models_dir else {
            return Ok(ResolvedModel {
                id: model.to_string(),
                path: None,
                refiner: None,
            });
        };

        let path = dir.join(model);
        if !fs.exists(&path) {
            return Err(SweepError::ModelResolutionFailed(format!(
                "model '{model}' not found in {}",
                dir.display()
            )));
        }

        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| model.to_string());
        debug!(model = %id, path = %path.display(), "resolved model");

        Ok(ResolvedModel {
            id,
            path: Some(path),
            refiner: None,
        })
    }

    fn build_command(&self, job: &Job, sweep: &SweepSpec) -> String {
        let flags = &sweep.flags;
        let mut parts: Vec<String> = vec![quote(&self.full_prompt(job, sweep))];

        match flags.seamless {
            SeamlessMode::Disabled => {}
            SeamlessMode::Both => parts.push("--seamless".to_string()),
            SeamlessMode::Horizontal => parts.push("--seamless --seamless_axes x".to_string()),
            SeamlessMode::Vertical => parts.push("--seamless --seamless_axes y".to_string()),
        }

        match flags.symmetry {
            SymmetryMode::Disabled => {}
            SymmetryMode::Horizontal => parts.push("--h_symmetry_time_pct 0.5".to_string()),
            SymmetryMode::Vertical => parts.push("--v_symmetry_time_pct 0.5".to_string()),
            SymmetryMode::Both => {
                parts.push("--h_symmetry_time_pct 0.5 --v_symmetry_time_pct 0.5".to_string())
            }
        }

        if flags.hires_fix {
            parts.push("--hires_fix".to_string());
        }
        if flags.perlin > 0.0 {
            parts.push(format!("--perlin {}", format_number(flags.perlin, 0, 3)));
        }
        if flags.threshold > 0 {
            parts.push(format!("--threshold {}", flags.threshold));
        }
        if flags.image_mode == ImageMode::TextMask {
            if let Some(mask) = flags.text_mask.as_deref().filter(|m| !m.trim().is_empty()) {
                parts.push(format!("-tm {}", quote(mask)));
            }
        }

        parts.push(format!(
            "-W {} -H {}",
            sweep.resolution.width, sweep.resolution.height
        ));
        parts.push(format!("-A {}", sweep.sampler.to_lowercase()));
        parts.push(format!("-S {}", job.seed));

        if let Some(scale) = job.scale {
            parts.push(format!("-C {}", format_number(scale.clamp(0.01, 1000.0), 0, 4)));
        }
        if let Some(steps) = job.steps {
            parts.push(format!("-s {steps}"));
        }

        if let Some(image) = &job.init_image {
            parts.push(format!("-I {}", quote_path(image)));

            // Masked modes always repaint fully.
            if flags.image_mode != ImageMode::InitImage {
                parts.push("-f 1.0".to_string());
            } else if let Some(strength) = job.init_strength {
                parts.push(format!("-f {}", format_number(1.0 - strength, 0, 3)));
            }

            match flags.image_mode {
                ImageMode::ImageMask => {
                    if let Some(mask) = &flags.mask_path {
                        parts.push(format!("-M {}", quote_path(mask)));
                    }
                }
                ImageMode::Outpainting => parts.push("--force_outpaint".to_string()),
                ImageMode::InitImage | ImageMode::TextMask => {}
            }
        }

        let extra = single_line(flags.append_args.trim());
        if !extra.is_empty() {
            parts.push(extra);
        }

        parts.join(" ")
    }

    fn validate(&self, job: &Job, sweep: &SweepSpec) -> std::result::Result<(), String> {
        let res = sweep.resolution;
        if res.width == 0 || res.height == 0 || res.width % RES_STEP != 0 || res.height % RES_STEP != 0 {
            return Err(format!("resolution {res} is not a multiple of {RES_STEP}"));
        }

        if job.init_image.is_some() {
            match sweep.flags.image_mode {
                ImageMode::ImageMask if sweep.flags.mask_path.is_none() => {
                    return Err("image mask mode without a mask image".to_string());
                }
                ImageMode::TextMask
                    if sweep
                        .flags
                        .text_mask
                        .as_deref()
                        .is_none_or(|m| m.trim().is_empty()) =>
                {
                    return Err("text mask mode without a mask description".to_string());
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn signature(
        &self,
        _sweep: &SweepSpec,
        worker: &WorkerSettings,
        model: &ResolvedModel,
    ) -> WorkerSignature {
        WorkerSignature::from_components([
            "invoke".to_string(),
            worker.program.clone(),
            worker.args.join(" "),
            model.id.clone(),
            worker.output_dir.to_string_lossy().into_owned(),
            worker.device_index.to_string(),
            worker.clip_skip.to_string(),
            worker.optimize.to_string(),
        ])
    }

    fn startup_args(
        &self,
        _sweep: &SweepSpec,
        worker: &WorkerSettings,
        model: &ResolvedModel,
    ) -> Vec<String> {
        let mut args = vec![
            "--model".to_string(),
            model.id.clone(),
            "-o".to_string(),
            worker.output_dir.to_string_lossy().into_owned(),
        ];
        if worker.optimize {
            args.push("--free_gpu_mem".to_string());
        }
        args
    }

    fn reuse_commands(&self, model: &ResolvedModel) -> Vec<String> {
        vec!["!clear".to_string(), format!("!switch {}", model.id)]
    }

    fn command_interval(&self) -> Duration {
        Duration::ZERO
    }

    fn markers(&self) -> &LineMarkers {
        &self.markers
    }
}
