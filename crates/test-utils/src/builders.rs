#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use sdsweep::backend::WorkerSettings;
use sdsweep::engine::{RunOptions, RunRequest};
use sdsweep::sweep::{AxisOrder, FineTune, SweepSpec};
use sdsweep::types::BackendKind;

/// Builder for `SweepSpec` with a single prompt and seed 100 as a base.
pub struct SweepBuilder {
    spec: SweepSpec,
}

impl SweepBuilder {
    pub fn new() -> Self {
        Self {
            spec: SweepSpec {
                prompts: vec!["a cat".to_string()],
                seed: 100,
                ..SweepSpec::default()
            },
        }
    }

    pub fn prompts(mut self, prompts: &[&str]) -> Self {
        self.spec.prompts = prompts.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn iterations(mut self, iterations: u32) -> Self {
        self.spec.iterations = iterations;
        self
    }

    pub fn steps(mut self, steps: &[u32]) -> Self {
        self.spec.steps = steps.to_vec();
        self
    }

    pub fn scales(mut self, scales: &[f32]) -> Self {
        self.spec.scales = scales.to_vec();
        self
    }

    pub fn refiner_strengths(mut self, values: &[f32]) -> Self {
        self.spec.refiner_strengths = values.to_vec();
        self
    }

    pub fn init_images(mut self, images: &[&str], strengths: &[f32]) -> Self {
        self.spec.init_images = images.iter().map(PathBuf::from).collect();
        self.spec.init_strengths = strengths.to_vec();
        self
    }

    pub fn fine_tune(mut self, name: &str, weights: &[f32]) -> Self {
        self.spec.fine_tunes.push(FineTune {
            name: name.to_string(),
            weights: weights.to_vec(),
        });
        self
    }

    pub fn seed(mut self, seed: i64) -> Self {
        self.spec.seed = seed;
        self
    }

    pub fn lock_seed(mut self) -> Self {
        self.spec.lock_seed = true;
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.spec.resolution.width = width;
        self.spec.resolution.height = height;
        self
    }

    pub fn build(self) -> SweepSpec {
        self.spec
    }
}

impl Default for SweepBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `RunRequest` against an invoke worker with short timeouts.
pub struct RequestBuilder {
    request: RunRequest,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            request: RunRequest {
                sweep: SweepBuilder::new().build(),
                order: AxisOrder::default(),
                worker: WorkerSettings {
                    model: "sd-1.5".to_string(),
                    args: vec!["scripts/invoke.py".to_string()],
                    ..WorkerSettings::default()
                },
                options: RunOptions {
                    ready_timeout: Duration::from_secs(5),
                    idle_timeout: Duration::from_secs(30),
                    ..RunOptions::default()
                },
            },
        }
    }

    pub fn sweep(mut self, sweep: SweepSpec) -> Self {
        self.request.sweep = sweep;
        self
    }

    pub fn order(mut self, order: AxisOrder) -> Self {
        self.request.order = order;
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.request.worker.backend = backend;
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.request.worker.model = model.to_string();
        self
    }

    pub fn output_dir(mut self, dir: &str) -> Self {
        self.request.worker.output_dir = PathBuf::from(dir);
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.request.options.ready_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.request.options.idle_timeout = timeout;
        self
    }

    pub fn build(self) -> RunRequest {
        self.request
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
