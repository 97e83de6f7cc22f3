// src/worker/supervisor.rs

//! Reuse-or-restart decisions for the single worker process.
//!
//! A running worker is reused only when its [`WorkerSignature`] equals the
//! one requested for the next run; liveness alone is not enough.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backend::{LaunchSpec, WorkerSignature};
use crate::errors::{Result, SweepError};
use crate::output::interpreter::Interpreter;
use crate::output::router::OutputRouter;
use crate::protocol::reader::{OutputStream, spawn_reader};
use crate::protocol::writer::CommandWriter;
use crate::worker::control::WorkerControl;
use crate::worker::launcher::WorkerLauncher;

/// How long to wait for a killed worker's exit to be observed.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NoWorker,
    Starting,
    Ready,
    Reused,
    Restarting,
    Stopped,
}

/// How [`Supervisor::ensure_ready`] obtained a ready worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Reused,
    Started,
}

/// The supervisor's view of a running worker.
pub struct ProcessHandle {
    signature: WorkerSignature,
    writer: Arc<CommandWriter>,
    control: Arc<dyn WorkerControl>,
    intentional_stop: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    readers: Vec<JoinHandle<usize>>,
    exit_watcher: Option<JoinHandle<()>>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("signature", &self.signature)
            .field("pid", &self.control.pid())
            .field("exited", &self.exited.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    pub fn signature(&self) -> &WorkerSignature {
        &self.signature
    }

    pub fn is_alive(&self) -> bool {
        !self.exited.load(Ordering::SeqCst)
    }

    pub fn writer(&self) -> Arc<CommandWriter> {
        self.writer.clone()
    }

    pub fn control(&self) -> Arc<dyn WorkerControl> {
        self.control.clone()
    }

    /// Kill the process tree and wait briefly for the exit to be observed.
    async fn stop(mut self) {
        self.intentional_stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.control.terminate_tree() {
            warn!(error = %e, "failed to terminate worker");
        }

        if let Some(watcher) = self.exit_watcher.take() {
            if timeout(STOP_GRACE, watcher).await.is_err() {
                warn!("worker exit not observed after kill");
            }
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // Orphan guard: a handle dropped without `stop` still takes the
        // process group down with it.
        if self.exit_watcher.is_some() && self.is_alive() {
            self.intentional_stop.store(true, Ordering::SeqCst);
            let _ = self.control.terminate_tree();
        }
        if let Some(watcher) = self.exit_watcher.take() {
            watcher.abort();
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

/// Control handed to callers outside the supervisor; a kill through it is
/// an intentional stop, so the exit watcher does not report it.
#[derive(Debug)]
struct SupervisedControl {
    inner: Arc<dyn WorkerControl>,
    intentional_stop: Arc<AtomicBool>,
}

impl WorkerControl for SupervisedControl {
    fn interrupt(&self) -> Result<()> {
        self.inner.interrupt()
    }

    fn terminate_tree(&self) -> Result<()> {
        self.intentional_stop.store(true, Ordering::SeqCst);
        self.inner.terminate_tree()
    }

    fn pid(&self) -> Option<u32> {
        self.inner.pid()
    }
}

/// Owns at most one worker process.
pub struct Supervisor<L: WorkerLauncher> {
    launcher: L,
    router: OutputRouter,
    handle: Option<ProcessHandle>,
    state: WorkerState,
    ready_timeout: Duration,
    launches: usize,
}

impl<L: WorkerLauncher> fmt::Debug for Supervisor<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state)
            .field("handle", &self.handle)
            .field("launches", &self.launches)
            .finish_non_exhaustive()
    }
}

impl<L: WorkerLauncher> Supervisor<L> {
    pub fn new(launcher: L, ready_timeout: Duration) -> Self {
        Self {
            launcher,
            router: OutputRouter::new(),
            handle: None,
            state: WorkerState::NoWorker,
            ready_timeout,
            launches: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn router(&self) -> &OutputRouter {
        &self.router
    }

    /// Number of processes launched so far.
    pub fn launches(&self) -> usize {
        self.launches
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(ProcessHandle::is_alive)
    }

    pub fn signature(&self) -> Option<&WorkerSignature> {
        self.handle.as_ref().map(ProcessHandle::signature)
    }

    pub fn writer(&self) -> Option<Arc<CommandWriter>> {
        self.handle.as_ref().map(ProcessHandle::writer)
    }

    pub fn control(&self) -> Option<Arc<dyn WorkerControl>> {
        self.handle.as_ref().map(ProcessHandle::control)
    }

    pub fn set_ready_timeout(&mut self, ready_timeout: Duration) {
        self.ready_timeout = ready_timeout;
    }

    /// Make sure a worker with `signature` is running and ready.
    ///
    /// `interpreter` is attached to the output router first; its readiness
    /// channel is what the startup wait observes.
    pub async fn ensure_ready(
        &mut self,
        signature: &WorkerSignature,
        launch: &LaunchSpec,
        reuse_commands: &[String],
        interpreter: &Arc<Interpreter>,
    ) -> Result<Readiness> {
        self.router.attach(interpreter.clone());

        if let Some(handle) = self.handle.as_ref().filter(|h| h.is_alive()) {
            if handle.signature() == signature {
                self.state = WorkerState::Reused;
                info!(signature = %signature, "reusing running worker");

                let writer = handle.writer();
                for command in reuse_commands {
                    writer.send(command).await?;
                }
                interpreter.mark_ready();
                self.state = WorkerState::Ready;
                return Ok(Readiness::Reused);
            }

            info!(
                old = %handle.signature(),
                new = %signature,
                "worker settings changed; restarting"
            );
            self.state = WorkerState::Restarting;
        }

        if let Some(old) = self.handle.take() {
            old.stop().await;
        }

        self.state = WorkerState::Starting;
        let launched = match self.launcher.launch(launch).await {
            Ok(launched) => launched,
            Err(e) => {
                self.state = WorkerState::NoWorker;
                return Err(SweepError::WorkerStartupFailed(e.to_string()));
            }
        };
        self.launches += 1;

        let intentional_stop = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));
        let control: Arc<dyn WorkerControl> = Arc::new(SupervisedControl {
            inner: launched.control.clone(),
            intentional_stop: intentional_stop.clone(),
        });

        let readers = vec![
            spawn_reader(launched.stdout, OutputStream::Stdout, self.router.clone()),
            spawn_reader(launched.stderr, OutputStream::Stderr, self.router.clone()),
        ];

        let exit_watcher = {
            let exit = launched.exit;
            let router = self.router.clone();
            let intentional_stop = intentional_stop.clone();
            let exited = exited.clone();
            tokio::spawn(async move {
                let code = exit.await;
                exited.store(true, Ordering::SeqCst);
                if intentional_stop.load(Ordering::SeqCst) {
                    debug!(?code, "worker stopped");
                } else {
                    warn!(?code, "worker exited unexpectedly");
                    router.worker_exited(code);
                }
            })
        };

        self.handle = Some(ProcessHandle {
            signature: signature.clone(),
            writer: Arc::new(CommandWriter::new(launched.stdin)),
            control,
            intentional_stop,
            exited,
            readers,
            exit_watcher: Some(exit_watcher),
        });

        match self.wait_for_ready(interpreter).await {
            Ok(()) => {
                self.state = WorkerState::Ready;
                info!(signature = %signature, "worker ready");
                Ok(Readiness::Started)
            }
            Err(e) => {
                self.stop().await;
                self.state = WorkerState::NoWorker;
                Err(e)
            }
        }
    }

    async fn wait_for_ready(&self, interpreter: &Interpreter) -> Result<()> {
        let mut ready = interpreter.subscribe_ready();
        let mut exit = interpreter.subscribe_exit();

        let wait = async {
            tokio::select! {
                r = ready.wait_for(|ready| *ready) => {
                    r.map(|_| ()).map_err(|_| SweepError::WorkerStartupFailed(
                        "readiness channel closed".to_string(),
                    ))
                }
                e = exit.wait_for(|exit| exit.is_some()) => {
                    let code = e.ok().and_then(|code| *code).flatten();
                    Err(SweepError::WorkerStartupFailed(format!(
                        "worker exited during startup (exit code {code:?})"
                    )))
                }
            }
        };

        match timeout(self.ready_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(SweepError::WorkerStartupFailed(format!(
                "no readiness marker within {:?}",
                self.ready_timeout
            ))),
        }
    }

    /// Stop the worker, if any. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!("stopping worker");
            handle.stop().await;
            self.state = WorkerState::Stopped;
        }
    }

    /// Forget a worker whose exit was already observed.
    pub async fn reap_if_exited(&mut self) {
        if self.handle.as_ref().is_some_and(|h| !h.is_alive()) {
            self.stop().await;
        }
    }
}
