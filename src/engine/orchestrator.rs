// src/engine/orchestrator.rs

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::artifacts::ArtifactCollector;
use crate::backend::WorkerSettings;
use crate::cancel::{CancelHandle, CancelOutcome, CancellationController, RunControl};
use crate::errors::{Result, SweepError};
use crate::fs::FileSystem;
use crate::output::interpreter::{Interpreter, ProgressSnapshot};
use crate::protocol::dispatch::{DispatchReport, dispatch};
use crate::worker::{Readiness, Supervisor, WorkerLauncher};

use super::plan::RunPlan;
use super::{RunReport, RunRequest, RunStatus};

/// Drives runs against one long-lived [`Supervisor`].
///
/// This is the IO shell around [`RunPlan`]: it owns the worker between
/// runs, so consecutive runs with an unchanged signature reuse it.
pub struct Orchestrator<L: WorkerLauncher> {
    supervisor: Supervisor<L>,
    fs: Arc<dyn FileSystem>,
    progress_tx: watch::Sender<ProgressSnapshot>,
}

impl<L: WorkerLauncher> fmt::Debug for Orchestrator<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

/// How long a failed write waits for the worker's exit code.
const EXIT_GRACE: Duration = Duration::from_secs(1);

enum Startup {
    Ready(Result<Readiness>),
    Canceled,
}

enum Wake {
    Progress,
    Exited,
    IdleCheck,
    Canceled,
}

enum Dispatched {
    Finished(Result<DispatchReport>),
    Stalled(Stall),
}

/// Why a worker stopped making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stall {
    Exited(Option<i32>),
    Idle,
}

impl<L: WorkerLauncher> Orchestrator<L> {
    pub fn new(launcher: L, fs: Arc<dyn FileSystem>) -> Self {
        let (progress_tx, _) = watch::channel(ProgressSnapshot::default());
        Self {
            supervisor: Supervisor::new(launcher, Duration::from_secs(120)),
            fs,
            progress_tx,
        }
    }

    /// Progress of whichever run is current.
    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    pub fn supervisor(&self) -> &Supervisor<L> {
        &self.supervisor
    }

    pub async fn shutdown(&mut self) {
        self.supervisor.stop().await;
    }

    /// Execute one run to a terminal [`RunReport`].
    ///
    /// Fatal errors stop the worker; completed and quiesced runs leave it
    /// running for the next request.
    pub async fn run(
        &mut self,
        request: &RunRequest,
        cancel: &CancelHandle,
        run_control: &dyn RunControl,
    ) -> RunReport {
        let started = Instant::now();
        let since = SystemTime::now();
        let mut report = RunReport::new();

        let plan = match RunPlan::prepare(request, self.fs.as_ref()) {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "run preparation failed");
                report.status = RunStatus::Failed(e);
                report.elapsed = started.elapsed();
                return report;
            }
        };
        report.total_jobs = plan.jobs.len();

        let collector = match ArtifactCollector::new(
            self.fs.clone(),
            artifact_dir(&request.worker),
            &request.options.artifact_pattern,
            since,
        ) {
            Ok(collector) => Arc::new(collector),
            Err(e) => {
                report.status = RunStatus::Failed(e);
                report.elapsed = started.elapsed();
                return report;
            }
        };

        let interpreter = Arc::new(
            Interpreter::new(plan.adapter.markers().clone(), plan.jobs.len())
                .with_sink(collector.clone()),
        );
        let forwarder = self.forward_progress(&interpreter);

        let status = self
            .drive(request, &plan, &interpreter, cancel, run_control, &mut report)
            .await;

        forwarder.abort();
        self.progress_tx.send_replace(interpreter.progress());
        self.supervisor.router().detach();
        collector.scan_async().await;

        info!(status = %status, sent = report.sent, "run finished");
        report.status = status;
        report.completed = interpreter.progress().completed;
        report.log = interpreter.recent_lines();
        report.artifacts = collector.artifacts();
        report.elapsed = started.elapsed();
        report
    }

    fn forward_progress(&self, interpreter: &Interpreter) -> JoinHandle<()> {
        let mut rx = interpreter.subscribe_progress();
        let tx = self.progress_tx.clone();
        tx.send_replace(rx.borrow().clone());
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                tx.send_replace(snapshot);
            }
        })
    }

    async fn drive(
        &mut self,
        request: &RunRequest,
        plan: &RunPlan,
        interpreter: &Arc<Interpreter>,
        cancel: &CancelHandle,
        run_control: &dyn RunControl,
        report: &mut RunReport,
    ) -> RunStatus {
        self.supervisor
            .set_ready_timeout(request.options.ready_timeout);

        let startup = tokio::select! {
            r = self.supervisor.ensure_ready(
                &plan.signature,
                &plan.launch,
                &plan.reuse_commands,
                interpreter,
            ) => Startup::Ready(r),
            _ = cancel.canceled() => Startup::Canceled,
        };

        let readiness = match startup {
            Startup::Ready(Ok(readiness)) => readiness,
            Startup::Ready(Err(e)) => return self.fail(e).await,
            Startup::Canceled => {
                info!("canceled during worker startup");
                self.supervisor.stop().await;
                return canceled(cancel);
            }
        };
        report.readiness = Some(readiness);

        let Some(writer) = self.supervisor.writer() else {
            return self
                .fail(SweepError::WorkerStartupFailed("no worker after startup".to_string()))
                .await;
        };
        writer.set_min_interval(plan.command_interval).await;

        // A full stdin pipe blocks the writer while the worker is busy, so
        // the write side is bounded by the same idle and exit checks.
        let idle_timeout = request.options.idle_timeout;
        let dispatched = tokio::select! {
            r = dispatch(
                &writer,
                plan.adapter.as_ref(),
                &plan.jobs,
                &request.sweep,
                interpreter,
                cancel,
            ) => Dispatched::Finished(r),
            stall = watch_stall(interpreter, idle_timeout, Instant::now()) => Dispatched::Stalled(stall),
        };

        let dispatched = match dispatched {
            Dispatched::Stalled(stall) => {
                warn!(?stall, "worker stalled while commands were being written");
                let job_index = interpreter
                    .current_job()
                    .or_else(|| plan.jobs.first().map(|j| j.index))
                    .unwrap_or(0);
                return self.stalled(stall, job_index, idle_timeout).await;
            }
            Dispatched::Finished(r) => r,
        };

        let dispatched = match dispatched {
            Ok(dispatched) => dispatched,
            Err(SweepError::NoValidCommands) => {
                warn!("every job was rejected; canceling run");
                report.rejected = plan.jobs.len();
                if readiness == Readiness::Started {
                    self.supervisor.stop().await;
                }
                return RunStatus::Canceled {
                    reason: SweepError::NoValidCommands.to_string(),
                };
            }
            Err(e) => {
                warn!(error = %e, "writing to worker failed");
                let job_index = interpreter
                    .current_job()
                    .or_else(|| plan.jobs.first().map(|j| j.index))
                    .unwrap_or(0);
                // A broken pipe usually means the exit is about to be observed.
                let mut exit = interpreter.subscribe_exit();
                let _ = timeout(EXIT_GRACE, exit.wait_for(|exit| exit.is_some())).await;
                let code = interpreter.exit_status().flatten();
                return self
                    .fail(SweepError::WorkerUnexpectedExit { job_index, code })
                    .await;
            }
        };
        report.sent = dispatched.sent;
        report.rejected = dispatched.rejected;
        interpreter.set_target(dispatched.sent);

        if dispatched.canceled {
            return self
                .cancel_run(request, interpreter, cancel, run_control)
                .await;
        }

        self.await_completion(request, &dispatched, interpreter, cancel, run_control)
            .await
    }

    async fn await_completion(
        &mut self,
        request: &RunRequest,
        dispatched: &DispatchReport,
        interpreter: &Arc<Interpreter>,
        cancel: &CancelHandle,
        run_control: &dyn RunControl,
    ) -> RunStatus {
        let idle_timeout = request.options.idle_timeout;
        let dispatched_at = Instant::now();
        let mut progress = interpreter.subscribe_progress();
        let mut exit = interpreter.subscribe_exit();

        loop {
            let completed = interpreter.progress().completed;
            if completed >= dispatched.sent {
                return RunStatus::Completed;
            }

            if let Some(stall) = stall_check(interpreter, idle_timeout, dispatched_at) {
                let job_index = dispatched
                    .sent_indices
                    .get(completed)
                    .copied()
                    .unwrap_or(completed);
                return self.stalled(stall, job_index, idle_timeout).await;
            }
            let quiet = quiet_for(interpreter, dispatched_at);

            let wake = tokio::select! {
                r = progress.changed() => match r {
                    Ok(()) => Wake::Progress,
                    Err(_) => Wake::Exited,
                },
                r = exit.changed() => match r {
                    Ok(()) => Wake::Exited,
                    Err(_) => Wake::IdleCheck,
                },
                _ = sleep(idle_timeout.saturating_sub(quiet)) => Wake::IdleCheck,
                _ = cancel.canceled() => Wake::Canceled,
            };

            match wake {
                Wake::Progress => {
                    let snapshot = progress.borrow_and_update().clone();
                    debug!(
                        completed = snapshot.completed,
                        target = snapshot.target,
                        percent = snapshot.run_percent,
                        "run progress"
                    );
                }
                Wake::Exited | Wake::IdleCheck => {}
                Wake::Canceled => {
                    return self
                        .cancel_run(request, interpreter, cancel, run_control)
                        .await;
                }
            }
        }
    }

    async fn cancel_run(
        &mut self,
        request: &RunRequest,
        interpreter: &Interpreter,
        cancel: &CancelHandle,
        run_control: &dyn RunControl,
    ) -> RunStatus {
        let Some(control) = self.supervisor.control() else {
            return canceled(cancel);
        };

        let controller = CancellationController::new(request.options.cancel.clone());
        match controller.cancel(interpreter, control.as_ref(), run_control).await {
            CancelOutcome::HardKilled => {
                self.supervisor.stop().await;
                canceled(cancel)
            }
            CancelOutcome::Quiesced { interrupts } => {
                debug!(interrupts, "worker kept for reuse");
                self.supervisor.reap_if_exited().await;
                canceled(cancel)
            }
            CancelOutcome::Escalated { .. } => {
                self.fail(SweepError::CancellationTimeout(
                    controller.options().safety_bound,
                ))
                .await
            }
        }
    }

    async fn stalled(&mut self, stall: Stall, job_index: usize, idle_timeout: Duration) -> RunStatus {
        match stall {
            Stall::Exited(code) => {
                self.supervisor.reap_if_exited().await;
                self.fail(SweepError::WorkerUnexpectedExit { job_index, code })
                    .await
            }
            Stall::Idle => self.fail(SweepError::WorkerIdle(idle_timeout)).await,
        }
    }

    async fn fail(&mut self, err: SweepError) -> RunStatus {
        error!(error = %err, "run failed");
        if err.is_fatal() {
            self.supervisor.stop().await;
        }
        RunStatus::Failed(err)
    }
}

/// Silence counted from the later of `since` and the last output line.
fn quiet_for(interpreter: &Interpreter, since: Instant) -> Duration {
    interpreter
        .since_last_line()
        .map_or(since.elapsed(), |gap| gap.min(since.elapsed()))
}

fn stall_check(interpreter: &Interpreter, idle_timeout: Duration, since: Instant) -> Option<Stall> {
    if let Some(code) = interpreter.exit_status() {
        return Some(Stall::Exited(code));
    }
    (quiet_for(interpreter, since) >= idle_timeout).then_some(Stall::Idle)
}

/// Resolves once the worker exits or stays silent for `idle_timeout`.
async fn watch_stall(interpreter: &Interpreter, idle_timeout: Duration, since: Instant) -> Stall {
    let mut progress = interpreter.subscribe_progress();
    let mut exit = interpreter.subscribe_exit();
    loop {
        if let Some(stall) = stall_check(interpreter, idle_timeout, since) {
            return stall;
        }
        let quiet = quiet_for(interpreter, since);
        tokio::select! {
            r = progress.changed() => {
                if r.is_ok() {
                    progress.borrow_and_update();
                }
            }
            r = exit.changed() => {
                if r.is_ok() {
                    exit.borrow_and_update();
                }
            }
            _ = sleep(idle_timeout.saturating_sub(quiet)) => {}
        }
    }
}

fn canceled(cancel: &CancelHandle) -> RunStatus {
    RunStatus::Canceled {
        reason: cancel.reason().unwrap_or_else(|| "canceled".to_string()),
    }
}

/// Where the worker writes images, as seen from this process.
fn artifact_dir(worker: &WorkerSettings) -> PathBuf {
    match &worker.working_dir {
        Some(dir) if worker.output_dir.is_relative() => dir.join(&worker.output_dir),
        _ => worker.output_dir.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_dir_follows_working_dir() {
        let mut worker = WorkerSettings::default();
        assert_eq!(artifact_dir(&worker), PathBuf::from("out"));

        worker.working_dir = Some(PathBuf::from("/srv/sd"));
        assert_eq!(artifact_dir(&worker), PathBuf::from("/srv/sd/out"));

        worker.output_dir = PathBuf::from("/data/images");
        assert_eq!(artifact_dir(&worker), PathBuf::from("/data/images"));
    }
}
