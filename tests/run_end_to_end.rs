mod common;
use crate::common::builders::{RequestBuilder, SweepBuilder};
use crate::common::fake_worker::{ScriptedLauncher, WorkerScript};
use crate::common::{init_tracing, with_timeout};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use sdsweep::cancel::{CancelHandle, NoopRunControl};
use sdsweep::engine::{Orchestrator, RunStatus};
use sdsweep::errors::SweepError;
use sdsweep::fs::mock::MockFileSystem;
use sdsweep::types::BackendKind;
use sdsweep::worker::Readiness;

fn four_job_request() -> sdsweep::engine::RunRequest {
    RequestBuilder::new()
        .sweep(
            SweepBuilder::new()
                .prompts(&["p1", "p2"])
                .steps(&[20, 30])
                .seed(100)
                .build(),
        )
        .build()
}

#[tokio::test]
async fn four_jobs_run_in_order_and_worker_is_reused() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file_modified("out/000001.100.png", "", SystemTime::now() + Duration::from_secs(60));
    let launcher = ScriptedLauncher::default();
    let log = launcher.log();
    let mut orchestrator = Orchestrator::new(launcher, Arc::new(fs));
    let request = four_job_request();

    let report = with_timeout(orchestrator.run(&request, &CancelHandle::new(), &NoopRunControl)).await;

    assert!(report.is_completed(), "unexpected status: {}", report.status);
    assert_eq!(report.total_jobs, 4);
    assert_eq!(report.sent, 4);
    assert_eq!(report.completed, 4);
    assert_eq!(report.readiness, Some(Readiness::Started));
    assert_eq!(report.artifacts, vec![PathBuf::from("out/000001.100.png")]);

    let commands = log.job_commands();
    assert_eq!(commands.len(), 4);
    let expected = [("p1", 20, 100), ("p1", 30, 101), ("p2", 20, 100), ("p2", 30, 101)];
    for (command, (prompt, steps, seed)) in commands.iter().zip(expected) {
        assert!(command.starts_with(&format!("\"{prompt}\"")), "{command}");
        assert!(command.contains(&format!("-S {seed} -s {steps}")), "{command}");
    }

    // Same settings again: no second launch.
    let again = with_timeout(orchestrator.run(&request, &CancelHandle::new(), &NoopRunControl)).await;
    assert!(again.is_completed());
    assert_eq!(again.readiness, Some(Readiness::Reused));
    assert_eq!(log.launches(), 1);
    assert_eq!(log.job_commands().len(), 8);
    assert!(log.commands().contains(&"!clear".to_string()));

    orchestrator.shutdown().await;
    assert_eq!(log.kills(), 1);
}

#[tokio::test]
async fn new_model_restarts_worker() {
    init_tracing();
    let launcher = ScriptedLauncher::default();
    let log = launcher.log();
    let mut orchestrator = Orchestrator::new(launcher, Arc::new(MockFileSystem::new()));

    let first = RequestBuilder::new().model("sd-1.5").build();
    let second = RequestBuilder::new().model("sd-2.1").build();

    let a = with_timeout(orchestrator.run(&first, &CancelHandle::new(), &NoopRunControl)).await;
    let b = with_timeout(orchestrator.run(&second, &CancelHandle::new(), &NoopRunControl)).await;

    assert!(a.is_completed() && b.is_completed());
    assert_eq!(b.readiness, Some(Readiness::Started));
    assert_eq!(log.launches(), 2);
    let specs = log.specs.lock().unwrap().clone();
    assert!(specs[1].args.contains(&"sd-2.1".to_string()));
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn all_jobs_rejected_cancels_and_stops_fresh_worker() {
    init_tracing();
    let launcher = ScriptedLauncher::default();
    let log = launcher.log();
    let mut orchestrator = Orchestrator::new(launcher, Arc::new(MockFileSystem::new()));
    let request = RequestBuilder::new()
        .sweep(SweepBuilder::new().resolution(500, 500).build())
        .build();

    let report = with_timeout(orchestrator.run(&request, &CancelHandle::new(), &NoopRunControl)).await;

    assert!(report.is_canceled(), "unexpected status: {}", report.status);
    assert_eq!(report.sent, 0);
    assert_eq!(report.rejected, 1);
    assert!(log.job_commands().is_empty());
    assert_eq!(log.kills(), 1);
    assert!(!orchestrator.supervisor().is_alive());
}

#[tokio::test]
async fn worker_crash_fails_run_with_job_index() {
    init_tracing();
    let launcher = ScriptedLauncher::new(WorkerScript {
        exit_after_jobs: Some(0),
        ..WorkerScript::default()
    });
    let mut orchestrator = Orchestrator::new(launcher, Arc::new(MockFileSystem::new()));
    let request = RequestBuilder::new()
        .sweep(SweepBuilder::new().steps(&[20, 30]).build())
        .build();

    let report = with_timeout(orchestrator.run(&request, &CancelHandle::new(), &NoopRunControl)).await;

    match report.status {
        RunStatus::Failed(SweepError::WorkerUnexpectedExit { job_index, code }) => {
            assert_eq!(job_index, 0);
            assert_eq!(code, Some(1));
        }
        other => panic!("expected unexpected exit, got {other}"),
    }
    assert_eq!(report.completed, 0);
    assert!(report.log.iter().any(|l| l.contains("loading model weights")));
    assert!(!orchestrator.supervisor().is_alive());
}

#[tokio::test(start_paused = true)]
async fn silent_worker_hits_idle_timeout() {
    init_tracing();
    let launcher = ScriptedLauncher::new(WorkerScript {
        step_delay: Duration::from_secs(3600),
        ..WorkerScript::default()
    });
    let log = launcher.log();
    let mut orchestrator = Orchestrator::new(launcher, Arc::new(MockFileSystem::new()));
    let request = RequestBuilder::new()
        .idle_timeout(Duration::from_secs(30))
        .build();

    let report = orchestrator
        .run(&request, &CancelHandle::new(), &NoopRunControl)
        .await;

    assert!(matches!(
        report.status,
        RunStatus::Failed(SweepError::WorkerIdle(d)) if d == Duration::from_secs(30)
    ));
    assert_eq!(log.kills(), 1);
}

#[tokio::test]
async fn unresolvable_model_never_launches() {
    init_tracing();
    let launcher = ScriptedLauncher::default();
    let log = launcher.log();
    let mut orchestrator = Orchestrator::new(launcher, Arc::new(MockFileSystem::new()));
    let request = RequestBuilder::new().model(" ").build();

    let report = orchestrator
        .run(&request, &CancelHandle::new(), &NoopRunControl)
        .await;

    assert!(matches!(
        report.status,
        RunStatus::Failed(SweepError::ModelResolutionFailed(_))
    ));
    assert_eq!(log.launches(), 0);
}

#[tokio::test]
async fn startup_failure_is_reported() {
    init_tracing();
    let launcher = ScriptedLauncher::new(WorkerScript {
        fail_launch: true,
        ..WorkerScript::default()
    });
    let mut orchestrator = Orchestrator::new(launcher, Arc::new(MockFileSystem::new()));

    let report = orchestrator
        .run(&RequestBuilder::new().build(), &CancelHandle::new(), &NoopRunControl)
        .await;

    assert!(matches!(
        report.status,
        RunStatus::Failed(SweepError::WorkerStartupFailed(_))
    ));
    assert_eq!(report.sent, 0);
}

#[tokio::test(start_paused = true)]
async fn busy_worker_with_full_stdin_hits_idle_timeout() {
    init_tracing();
    let launcher = ScriptedLauncher::new(WorkerScript {
        step_delay: Duration::from_secs(3600),
        ..WorkerScript::default()
    });
    let log = launcher.log();
    let mut orchestrator = Orchestrator::new(launcher, Arc::new(MockFileSystem::new()));
    // 100 commands of ~2 KB each overflow the 64 KiB stdin pipe while the
    // worker sits in its first job.
    let prompt = "x".repeat(2000);
    let request = RequestBuilder::new()
        .sweep(SweepBuilder::new().prompts(&[prompt.as_str()]).iterations(100).build())
        .idle_timeout(Duration::from_secs(30))
        .build();

    let report = orchestrator
        .run(&request, &CancelHandle::new(), &NoopRunControl)
        .await;

    assert!(
        matches!(
            report.status,
            RunStatus::Failed(SweepError::WorkerIdle(d)) if d == Duration::from_secs(30)
        ),
        "unexpected status: {}",
        report.status
    );
    assert!(report.elapsed < Duration::from_secs(120), "took {:?}", report.elapsed);
    assert!(log.job_commands().len() < 100);
    assert_eq!(log.kills(), 1);
}

#[tokio::test(start_paused = true)]
async fn xl_progress_is_weighted_by_phase() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("models/sd_xl_base.safetensors", "");
    fs.add_file("models/sd_xl_refiner.safetensors", "");
    let launcher = ScriptedLauncher::new(WorkerScript {
        ready_line: Some("Model loaded".to_string()),
        phase_lines: vec![
            "Running base model".to_string(),
            "Running refine model".to_string(),
        ],
        progress_steps: 2,
        step_delay: Duration::from_secs(1),
        ..WorkerScript::default()
    });
    let log = launcher.log();
    let mut orchestrator = Orchestrator::new(launcher, Arc::new(fs));
    let request = RequestBuilder::new()
        .backend(BackendKind::Xl)
        .model("models/sd_xl_base.safetensors")
        .build();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut progress = orchestrator.subscribe_progress();
    let recorder = {
        let seen = seen.clone();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let percent = progress.borrow_and_update().run_percent;
                seen.lock().unwrap().push(percent);
            }
        })
    };

    let report = orchestrator
        .run(&request, &CancelHandle::new(), &NoopRunControl)
        .await;
    recorder.abort();

    assert!(report.is_completed(), "unexpected status: {}", report.status);
    assert_eq!(report.completed, 1);

    let mut percents = seen.lock().unwrap().clone();
    percents.retain(|p| *p > 0);
    percents.dedup();
    // Base bar covers 0-70 %, the refiner bar 70-100 %.
    assert_eq!(percents, vec![35, 70, 85, 100]);

    let commands = log.job_commands();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].starts_with("generate {"), "{}", commands[0]);
    let specs = log.specs.lock().unwrap().clone();
    assert!(specs[0].args.contains(&"models/sd_xl_refiner.safetensors".to_string()));
    orchestrator.shutdown().await;
}
