mod common;
use crate::common::fake_worker::{ScriptedLauncher, WorkerScript};
use crate::common::{init_tracing, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use sdsweep::backend::{BackendAdapter, InvokeAdapter, LaunchSpec, WorkerSignature};
use sdsweep::errors::SweepError;
use sdsweep::output::Interpreter;
use sdsweep::worker::{Readiness, Supervisor, WorkerControl, WorkerState};

fn launch() -> LaunchSpec {
    LaunchSpec {
        program: "python".to_string(),
        args: vec!["scripts/invoke.py".to_string()],
        env: Default::default(),
        working_dir: None,
    }
}

fn interpreter() -> Arc<Interpreter> {
    let adapter = InvokeAdapter::new().unwrap();
    Arc::new(Interpreter::new(adapter.markers().clone(), 1))
}

#[tokio::test]
async fn same_signature_reuses_running_worker() {
    init_tracing();
    let launcher = ScriptedLauncher::default();
    let log = launcher.log();
    let mut supervisor = Supervisor::new(launcher, Duration::from_secs(5));
    let sig = WorkerSignature::from_components(["invoke", "sd-1.5"]);
    let reuse = vec!["!clear".to_string(), "!switch sd-1.5".to_string()];

    let first = with_timeout(supervisor.ensure_ready(&sig, &launch(), &reuse, &interpreter()))
        .await
        .unwrap();
    assert_eq!(first, Readiness::Started);
    assert_eq!(supervisor.state(), WorkerState::Ready);

    let second = with_timeout(supervisor.ensure_ready(&sig, &launch(), &reuse, &interpreter()))
        .await
        .unwrap();
    assert_eq!(second, Readiness::Reused);
    assert_eq!(log.launches(), 1);
    assert_eq!(log.kills(), 0);

    // Reuse commands reach the worker.
    with_timeout(async {
        while log.commands().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(log.commands(), reuse);

    supervisor.stop().await;
    assert_eq!(supervisor.state(), WorkerState::Stopped);
}

#[tokio::test]
async fn changed_signature_restarts_worker() {
    init_tracing();
    let launcher = ScriptedLauncher::default();
    let log = launcher.log();
    let mut supervisor = Supervisor::new(launcher, Duration::from_secs(5));
    let x = WorkerSignature::from_components(["invoke", "sd-1.5"]);
    let y = WorkerSignature::from_components(["invoke", "sd-2.1"]);

    with_timeout(supervisor.ensure_ready(&x, &launch(), &[], &interpreter()))
        .await
        .unwrap();
    let readiness = with_timeout(supervisor.ensure_ready(&y, &launch(), &[], &interpreter()))
        .await
        .unwrap();

    assert_eq!(readiness, Readiness::Started);
    assert_eq!(log.launches(), 2);
    assert_eq!(log.kills(), 1);
    assert_eq!(supervisor.signature(), Some(&y));
    supervisor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn missing_readiness_marker_times_out() {
    init_tracing();
    let launcher = ScriptedLauncher::new(WorkerScript {
        ready_line: None,
        ..WorkerScript::default()
    });
    let log = launcher.log();
    let mut supervisor = Supervisor::new(launcher, Duration::from_secs(3));
    let sig = WorkerSignature::from_components(["invoke"]);

    let result = supervisor.ensure_ready(&sig, &launch(), &[], &interpreter()).await;

    assert!(matches!(result, Err(SweepError::WorkerStartupFailed(msg)) if msg.contains("readiness")));
    assert_eq!(log.kills(), 1);
    assert!(!supervisor.is_alive());
}

#[tokio::test]
async fn launch_failure_is_a_startup_error() {
    init_tracing();
    let launcher = ScriptedLauncher::new(WorkerScript {
        fail_launch: true,
        ..WorkerScript::default()
    });
    let mut supervisor = Supervisor::new(launcher, Duration::from_secs(5));
    let sig = WorkerSignature::from_components(["invoke"]);

    let result = supervisor.ensure_ready(&sig, &launch(), &[], &interpreter()).await;
    assert!(matches!(result, Err(SweepError::WorkerStartupFailed(_))));
    assert_eq!(supervisor.state(), WorkerState::NoWorker);
    assert_eq!(supervisor.launches(), 0);
}

#[tokio::test]
async fn kill_through_supervisor_control_is_not_a_crash() {
    init_tracing();
    let launcher = ScriptedLauncher::default();
    let log = launcher.log();
    let mut supervisor = Supervisor::new(launcher, Duration::from_secs(5));
    let sig = WorkerSignature::from_components(["invoke"]);
    let interp = interpreter();
    with_timeout(supervisor.ensure_ready(&sig, &launch(), &[], &interp))
        .await
        .unwrap();

    supervisor.control().unwrap().terminate_tree().unwrap();
    with_timeout(async {
        while supervisor.is_alive() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert_eq!(log.kills(), 1);
    assert_eq!(interp.exit_status(), None);
    supervisor.stop().await;
}

#[tokio::test]
async fn worker_crash_is_reported_to_the_run() {
    init_tracing();
    let launcher = ScriptedLauncher::new(WorkerScript {
        exit_after_jobs: Some(0),
        ..WorkerScript::default()
    });
    let mut supervisor = Supervisor::new(launcher, Duration::from_secs(5));
    let sig = WorkerSignature::from_components(["invoke"]);
    let interp = interpreter();
    with_timeout(supervisor.ensure_ready(&sig, &launch(), &[], &interp))
        .await
        .unwrap();

    supervisor.writer().unwrap().send("\"a cat\"").await.unwrap();
    with_timeout(async {
        while interp.exit_status().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert_eq!(interp.exit_status(), Some(Some(1)));
    assert!(!supervisor.is_alive());
}
