// src/sweep/spec.rs

//! The sweep specification: every axis with its value list, plus the
//! per-run flags that travel unchanged into every job's command.

use std::fmt;
use std::path::PathBuf;

use crate::sweep::values::format_number;
use crate::types::{ImageMode, SeamlessMode, SymmetryMode};

/// Output image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A fine-tune (LoRA-style) entry and the weights to sweep for it.
///
/// The prompt refers to the weight through the placeholder
/// `<name>Weight`, which is replaced by the job's weight when exactly one
/// entry is configured.
#[derive(Debug, Clone, PartialEq)]
pub struct FineTune {
    pub name: String,
    pub weights: Vec<f32>,
}

impl FineTune {
    pub fn placeholder(&self) -> String {
        format!("{}Weight", self.name)
    }
}

/// Backend-specific flags that are constant across all jobs of a sweep.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationFlags {
    pub seamless: SeamlessMode,
    pub symmetry: SymmetryMode,
    pub hires_fix: bool,
    pub perlin: f32,
    pub threshold: u32,
    pub image_mode: ImageMode,
    /// Mask image used when `image_mode` is `ImageMask`.
    pub mask_path: Option<PathBuf>,
    /// Mask description used when `image_mode` is `TextMask`.
    pub text_mask: Option<String>,
    /// Raw arguments appended verbatim to every command.
    pub append_args: String,
}

/// Full description of one sweep.
///
/// Empty value lists mean "use the worker default" and count as a single
/// value; they never make the sweep empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSpec {
    pub prompts: Vec<String>,
    pub negative_prompt: String,
    pub iterations: u32,
    pub steps: Vec<u32>,
    pub scales: Vec<f32>,
    pub refiner_strengths: Vec<f32>,
    pub init_images: Vec<PathBuf>,
    pub init_strengths: Vec<f32>,
    pub fine_tunes: Vec<FineTune>,
    pub seed: i64,
    pub lock_seed: bool,
    pub resolution: Resolution,
    pub sampler: String,
    pub flags: GenerationFlags,
}

impl Default for SweepSpec {
    fn default() -> Self {
        Self {
            prompts: Vec::new(),
            negative_prompt: String::new(),
            iterations: 1,
            steps: Vec::new(),
            scales: Vec::new(),
            refiner_strengths: Vec::new(),
            init_images: Vec::new(),
            init_strengths: Vec::new(),
            fine_tunes: Vec::new(),
            seed: 0,
            lock_seed: false,
            resolution: Resolution::default(),
            sampler: "k_euler".to_string(),
            flags: GenerationFlags::default(),
        }
    }
}

impl SweepSpec {
    pub fn has_init_images(&self) -> bool {
        !self.init_images.is_empty()
    }

    /// `1` without source images, otherwise images × strengths.
    pub fn init_multiplier(&self) -> usize {
        if self.init_images.is_empty() {
            1
        } else {
            self.init_images.len() * self.init_strengths.len().max(1)
        }
    }

    /// Only a single fine-tune entry is swept; several entries degrade to
    /// one fixed value.
    pub fn fine_tune_multiplier(&self) -> usize {
        match self.fine_tunes.as_slice() {
            [single] => single.weights.len().max(1),
            _ => 1,
        }
    }

    /// Number of jobs the expander produces for this spec, `None` on
    /// overflow.
    pub fn checked_job_count(&self) -> Option<usize> {
        let init_strengths = if self.has_init_images() {
            self.init_strengths.len().max(1)
        } else {
            1
        };
        [
            self.prompts.len().max(1),
            self.iterations.max(1) as usize,
            self.scales.len().max(1),
            self.steps.len().max(1),
            self.init_images.len().max(1),
            init_strengths,
            self.fine_tune_multiplier(),
            self.refiner_strengths.len().max(1),
        ]
        .into_iter()
        .try_fold(1usize, usize::checked_mul)
    }

    /// Number of jobs the expander produces for this spec, saturating.
    pub fn expected_job_count(&self) -> usize {
        self.checked_job_count().unwrap_or(usize::MAX)
    }

    /// Number of images expected on disk, counting post-processed copies
    /// when originals are kept next to them.
    pub fn estimated_image_count(&self, post_doubling: bool) -> usize {
        let count = self.expected_job_count();
        if post_doubling { count.saturating_mul(2) } else { count }
    }

    /// Prompt text with the fine-tune weight placeholder substituted.
    pub fn prompt_with_weight(&self, prompt: &str, weight: Option<f32>) -> String {
        match (self.fine_tunes.as_slice(), weight) {
            ([single], Some(w)) => prompt.replace(&single.placeholder(), &format_number(w, 1, 4)),
            _ => prompt.to_string(),
        }
    }
}
