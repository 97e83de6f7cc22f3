// src/engine/plan.rs

//! Pure preparation of a run: adapter, model, jobs, signature and launch
//! command. No process is touched here, which is what `--dry-run` prints.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::backend::{BackendAdapter, LaunchSpec, ResolvedModel, WorkerSignature, adapter_for};
use crate::engine::RunRequest;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::sweep::{AxisOrder, Job, describe_count, expand, first_last_seed};

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub adapter: Arc<dyn BackendAdapter>,
    pub model: ResolvedModel,
    pub order: AxisOrder,
    pub jobs: Vec<Job>,
    pub signature: WorkerSignature,
    pub launch: LaunchSpec,
    pub reuse_commands: Vec<String>,
    pub command_interval: Duration,
}

impl RunPlan {
    pub fn prepare(request: &RunRequest, fs: &dyn FileSystem) -> Result<Self> {
        let adapter = adapter_for(&request.worker)?;
        let model = adapter.resolve(&request.worker, fs)?;

        let order = request.order.pruned_for(&request.sweep);
        let jobs = expand(&request.sweep, &order);

        info!(
            "{}",
            describe_count(&request.sweep, jobs.len(), request.options.post_doubling)
        );
        info!(
            backend = %adapter.kind(),
            resolution = %request.sweep.resolution,
            seeds = %first_last_seed(&jobs),
            "sweep expanded"
        );

        let signature = adapter.signature(&request.sweep, &request.worker, &model);
        let launch = adapter.launch_spec(&request.sweep, &request.worker, &model);
        let reuse_commands = adapter.reuse_commands(&model);
        let command_interval = request
            .options
            .command_interval
            .unwrap_or_else(|| adapter.command_interval());

        Ok(Self {
            adapter,
            model,
            order,
            jobs,
            signature,
            launch,
            reuse_commands,
            command_interval,
        })
    }

    /// Protocol lines for every job, `Err` for rejected ones.
    pub fn commands(&self, request: &RunRequest) -> Vec<std::result::Result<String, String>> {
        self.jobs
            .iter()
            .map(|job| {
                self.adapter
                    .validate(job, &request.sweep)
                    .map(|()| self.adapter.build_command(job, &request.sweep))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::WorkerSettings;
    use crate::engine::RunOptions;
    use crate::errors::SweepError;
    use crate::fs::mock::MockFileSystem;
    use crate::sweep::SweepSpec;

    fn request() -> RunRequest {
        RunRequest {
            sweep: SweepSpec {
                prompts: vec!["a".into(), "b".into()],
                steps: vec![20, 30],
                seed: 100,
                ..SweepSpec::default()
            },
            order: AxisOrder::default(),
            worker: WorkerSettings {
                model: "sd-1.5".to_string(),
                ..WorkerSettings::default()
            },
            options: RunOptions::default(),
        }
    }

    #[test]
    fn prepares_jobs_and_commands() {
        let req = request();
        let plan = RunPlan::prepare(&req, &MockFileSystem::new()).unwrap();

        assert_eq!(plan.jobs.len(), 4);
        assert_eq!(plan.command_interval, Duration::ZERO);
        assert_eq!(plan.reuse_commands.len(), 2);

        let commands = plan.commands(&req);
        assert!(commands.iter().all(|c| c.is_ok()));
        assert!(commands[1].as_ref().unwrap().contains("-S 101"));
    }

    #[test]
    fn missing_model_fails_preparation() {
        let mut req = request();
        req.worker.model.clear();
        assert!(matches!(
            RunPlan::prepare(&req, &MockFileSystem::new()),
            Err(SweepError::ModelResolutionFailed(_))
        ));
    }
}
