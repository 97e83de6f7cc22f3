// src/backend/xl.rs

//! Adapter for the two-stage (base + refiner) worker driven by
//! `generate {json}` lines.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::backend::quote::single_line;
use crate::backend::{BackendAdapter, ResolvedModel, WorkerSettings, WorkerSignature};
use crate::errors::{Result, SweepError};
use crate::fs::FileSystem;
use crate::output::markers::LineMarkers;
use crate::sweep::values::format_number;
use crate::sweep::{Job, SweepSpec};
use crate::types::{BackendKind, ImageMode};

const READY: &str = r"^Model loaded";
const PROGRESS: &str = r"(\d+)%\|";
const PROGRESS_EXCLUDE: &str = r"Loading";
const COMPLETION: &str = r"(?i)image(?:\(s\))? generated in (?P<secs>[\d.]+)s";
const ERROR: &str = r"(?i)(error occurred|traceback \(most recent call last\))";
const PHASE_BASE: &str = r"Running base model";
const PHASE_REFINE: &str = r"Running refine model";

const RES_STEP: u32 = 8;
const INPAINTING_SUFFIX: &str = "-inpainting";

/// One `generate` payload. Every value is a string on the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateArgs {
    prompt: String,
    prompt_neg: String,
    init_img: String,
    init_strength: String,
    inpaint_mask: String,
    w: String,
    h: String,
    seed: String,
    sampler: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scale_txt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refine_frac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<String>,
}

#[derive(Debug, Clone)]
pub struct XlAdapter {
    markers: LineMarkers,
}

impl XlAdapter {
    pub fn new() -> std::result::Result<Self, regex::Error> {
        let markers = LineMarkers::new(READY)?
            .with_phase(PHASE_BASE, 0.7, 0.0)?
            .with_phase(PHASE_REFINE, 0.3, 70.0)?
            .with_progress(PROGRESS, Some(PROGRESS_EXCLUDE))?
            .with_completion(COMPLETION)?
            .with_error(ERROR)?;
        Ok(Self { markers })
    }

    pub fn with_ready_pattern(mut self, pattern: &str) -> std::result::Result<Self, regex::Error> {
        self.markers = self.markers.with_readiness(pattern)?;
        Ok(self)
    }

    /// `txt2img`, `img2img`, or `inpaint` (masked modes on an inpainting
    /// model).
    fn generation_mode(sweep: &SweepSpec, model: &ResolvedModel) -> &'static str {
        if !sweep.has_init_images() {
            return "txt2img";
        }
        let inpainting_model = model
            .path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().ends_with(INPAINTING_SUFFIX))
            .unwrap_or(false);
        if inpainting_model && sweep.flags.image_mode != ImageMode::InitImage {
            "inpaint"
        } else {
            "img2img"
        }
    }
}

/// Refiner path next to `base`: the file name with `base` replaced by
/// `refiner`. `None` when the name has no `base` in it.
fn refiner_candidate(base: &Path) -> Option<PathBuf> {
    let name = base.file_name()?.to_string_lossy();
    let refined = name.replace("base", "refiner");
    if refined == name {
        return None;
    }
    Some(base.with_file_name(refined))
}

impl BackendAdapter for XlAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Xl
    }

    fn resolve(&self, worker: &WorkerSettings, fs: &dyn FileSystem) -> Result<ResolvedModel> {
        let model = worker.model.trim();
        if model.is_empty() {
            return Err(SweepError::ModelResolutionFailed(
                "no model configured".to_string(),
            ));
        }

        let path = match &worker.models_dir {
            Some(dir) => dir.join(model),
            None => PathBuf::from(model),
        };
        if !fs.exists(&path) {
            return Err(SweepError::ModelResolutionFailed(format!(
                "model path {} does not exist",
                path.display()
            )));
        }

        let refiner = refiner_candidate(&path).filter(|p| fs.exists(p));
        match &refiner {
            Some(p) => info!(refiner = %p.display(), "found refiner model"),
            None => warn!(model = %path.display(), "refiner model not found"),
        }

        Ok(ResolvedModel {
            id: path.to_string_lossy().into_owned(),
            path: Some(path),
            refiner,
        })
    }

    fn build_command(&self, job: &Job, sweep: &SweepSpec) -> String {
        let flags = &sweep.flags;
        let (init_img, init_strength, inpaint_mask) = match &job.init_image {
            Some(image) => {
                let strength = job.init_strength.map(|s| 1.0 - s).unwrap_or(0.0);
                let mask = match (&flags.image_mode, &flags.mask_path) {
                    (ImageMode::ImageMask, Some(mask)) => mask.to_string_lossy().into_owned(),
                    _ => String::new(),
                };
                (
                    image.to_string_lossy().into_owned(),
                    format_number(strength, 0, 3),
                    mask,
                )
            }
            None => (String::new(), "0".to_string(), String::new()),
        };

        let args = GenerateArgs {
            prompt: single_line(&job.prompt),
            prompt_neg: single_line(&sweep.negative_prompt),
            init_img,
            init_strength,
            inpaint_mask,
            w: sweep.resolution.width.to_string(),
            h: sweep.resolution.height.to_string(),
            seed: job.seed.to_string(),
            sampler: sweep.sampler.to_lowercase(),
            scale_txt: job.scale.map(|s| format_number(s, 0, 4)),
            refine_frac: job.refiner_strength.map(|r| format_number(1.0 - r, 0, 4)),
            steps: job.steps.map(|s| s.to_string()),
        };

        // serde_json escapes control characters, so the line stays single.
        match serde_json::to_string(&args) {
            Ok(json) => format!("generate {json}"),
            Err(e) => {
                warn!(job = job.index, error = %e, "failed to serialise generate arguments");
                "generate {}".to_string()
            }
        }
    }

    fn validate(&self, job: &Job, sweep: &SweepSpec) -> std::result::Result<(), String> {
        let res = sweep.resolution;
        if res.width == 0 || res.height == 0 || res.width % RES_STEP != 0 || res.height % RES_STEP != 0 {
            return Err(format!("resolution {res} is not a multiple of {RES_STEP}"));
        }
        if job.init_image.is_some()
            && sweep.flags.image_mode == ImageMode::ImageMask
            && sweep.flags.mask_path.is_none()
        {
            return Err("image mask mode without a mask image".to_string());
        }
        Ok(())
    }

    fn signature(
        &self,
        sweep: &SweepSpec,
        worker: &WorkerSettings,
        model: &ResolvedModel,
    ) -> WorkerSignature {
        WorkerSignature::from_components([
            "xl".to_string(),
            worker.program.clone(),
            worker.args.join(" "),
            model.id.clone(),
            model
                .refiner
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Self::generation_mode(sweep, model).to_string(),
            worker.output_dir.to_string_lossy().into_owned(),
            worker.device_index.to_string(),
            worker.clip_skip.to_string(),
            worker.optimize.to_string(),
        ])
    }

    fn startup_args(
        &self,
        sweep: &SweepSpec,
        worker: &WorkerSettings,
        model: &ResolvedModel,
    ) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "SdXl".to_string(),
            "-g".to_string(),
            Self::generation_mode(sweep, model).to_string(),
            "-m".to_string(),
            model.id.clone(),
            "-o".to_string(),
            worker.output_dir.to_string_lossy().into_owned(),
        ];
        if let Some(refiner) = &model.refiner {
            args.push("-m2".to_string());
            args.push(refiner.to_string_lossy().into_owned());
        }
        if worker.optimize {
            args.push("--sdxl_optimize".to_string());
        }
        args
    }

    fn command_interval(&self) -> Duration {
        Duration::from_millis(200)
    }

    fn markers(&self) -> &LineMarkers {
        &self.markers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::output::markers::LineEvent;

    fn job() -> Job {
        Job {
            index: 3,
            prompt_index: 0,
            prompt: "castle\non a hill".to_string(),
            iteration: 0,
            seed: 9,
            scale: Some(6.0),
            steps: Some(25),
            refiner_strength: Some(0.2),
            init_image: None,
            init_strength: None,
            fine_tune_weight: None,
        }
    }

    #[test]
    fn builds_generate_json() {
        let adapter = XlAdapter::new().unwrap();
        let sweep = SweepSpec {
            resolution: crate::sweep::Resolution {
                width: 1024,
                height: 1024,
            },
            ..SweepSpec::default()
        };
        let cmd = adapter.build_command(&job(), &sweep);
        assert!(cmd.starts_with("generate {\"prompt\":\"castle on a hill\""));
        assert!(cmd.contains("\"initStrength\":\"0\""));
        assert!(cmd.contains("\"w\":\"1024\""));
        assert!(cmd.contains("\"seed\":\"9\""));
        assert!(cmd.contains("\"scaleTxt\":\"6\""));
        assert!(cmd.contains("\"refineFrac\":\"0.8\""));
        assert!(cmd.contains("\"steps\":\"25\""));
        assert!(!cmd.contains('\n'));
    }

    #[test]
    fn resolution_must_be_multiple_of_eight() {
        let adapter = XlAdapter::new().unwrap();
        let mut sweep = SweepSpec::default();
        sweep.resolution.width = 1020;
        assert!(adapter.validate(&job(), &sweep).is_err());
        sweep.resolution.width = 1016;
        assert!(adapter.validate(&job(), &sweep).is_ok());
    }

    #[test]
    fn resolves_refiner_next_to_base() {
        let adapter = XlAdapter::new().unwrap();
        let fs = MockFileSystem::new();
        fs.add_file("models/sdxl-base-1.0.safetensors", "");
        fs.add_file("models/sdxl-refiner-1.0.safetensors", "");

        let worker = WorkerSettings {
            backend: BackendKind::Xl,
            model: "sdxl-base-1.0.safetensors".to_string(),
            models_dir: Some(PathBuf::from("models")),
            ..WorkerSettings::default()
        };
        let resolved = adapter.resolve(&worker, &fs).unwrap();
        assert_eq!(
            resolved.refiner,
            Some(PathBuf::from("models/sdxl-refiner-1.0.safetensors"))
        );

        let args = adapter.startup_args(&SweepSpec::default(), &worker, &resolved);
        assert_eq!(&args[..4], &["-p", "SdXl", "-g", "txt2img"]);
        assert!(args.contains(&"-m2".to_string()));
    }

    #[test]
    fn missing_refiner_is_not_fatal() {
        let adapter = XlAdapter::new().unwrap();
        let fs = MockFileSystem::new();
        fs.add_file("models/custom.safetensors", "");

        let worker = WorkerSettings {
            backend: BackendKind::Xl,
            model: "custom.safetensors".to_string(),
            models_dir: Some(PathBuf::from("models")),
            ..WorkerSettings::default()
        };
        let resolved = adapter.resolve(&worker, &fs).unwrap();
        assert_eq!(resolved.refiner, None);
    }

    #[test]
    fn loading_bars_are_not_progress() {
        let adapter = XlAdapter::new().unwrap();
        let markers = adapter.markers();
        assert_eq!(markers.classify("Model loaded in 12s"), LineEvent::Ready);
        assert_eq!(
            markers.classify("Loading pipeline components...: 40%|####"),
            LineEvent::Unrecognized
        );
        assert_eq!(markers.classify(" 50%|#####     | 10/20"), LineEvent::Progress(50));
        assert_eq!(markers.classify("Running refine model"), LineEvent::Phase(1));
    }

    #[test]
    fn init_images_switch_generation_mode() {
        let sweep = SweepSpec {
            init_images: vec![PathBuf::from("a.png")],
            ..SweepSpec::default()
        };
        let model = ResolvedModel {
            id: "m".to_string(),
            path: Some(PathBuf::from("sdxl-base-inpainting.safetensors")),
            refiner: None,
        };
        assert_eq!(XlAdapter::generation_mode(&sweep, &model), "img2img");

        let mut masked = sweep.clone();
        masked.flags.image_mode = ImageMode::ImageMask;
        assert_eq!(XlAdapter::generation_mode(&masked, &model), "inpaint");
    }
}
