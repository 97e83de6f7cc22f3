use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{oneshot, watch};
use tokio::time::sleep;

use sdsweep::backend::LaunchSpec;
use sdsweep::errors::{Result, SweepError};
use sdsweep::worker::{LaunchedWorker, WorkerControl, WorkerLauncher};

/// What the in-memory worker does.
#[derive(Debug, Clone)]
pub struct WorkerScript {
    /// Lines printed on stdout right after launch.
    pub startup_lines: Vec<String>,
    /// Readiness line; `None` means the worker never becomes ready.
    pub ready_line: Option<String>,
    pub fail_launch: bool,
    /// Exit with code 1 after receiving this many job commands.
    pub exit_after_jobs: Option<usize>,
    /// Print progress but never finish an image (until interrupted).
    pub endless_progress: bool,
    /// Keep generating when interrupted.
    pub ignore_interrupts: bool,
    /// Stdout lines that each open a progress bar of their own (one per
    /// pipeline phase). Empty means a single unnamed bar.
    pub phase_lines: Vec<String>,
    /// Progress lines per bar, spread over `step_delay` each.
    pub progress_steps: u32,
    pub step_delay: Duration,
}

impl Default for WorkerScript {
    fn default() -> Self {
        Self {
            startup_lines: vec!["loading model weights".to_string()],
            ready_line: Some("* Initialization done! Awaiting your command".to_string()),
            fail_launch: false,
            exit_after_jobs: None,
            endless_progress: false,
            ignore_interrupts: false,
            phase_lines: Vec::new(),
            progress_steps: 2,
            step_delay: Duration::from_millis(10),
        }
    }
}

/// Everything observable about the fake workers a launcher created.
#[derive(Debug, Default)]
pub struct WorkerLog {
    pub launches: AtomicUsize,
    pub interrupts: AtomicUsize,
    pub kills: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
    pub specs: Mutex<Vec<LaunchSpec>>,
}

impl WorkerLog {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Commands that were jobs (not `!`-prefixed maintenance commands).
    pub fn job_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| !c.starts_with('!'))
            .collect()
    }
}

/// [`WorkerLauncher`] that runs a scripted worker on in-memory pipes.
///
/// Each job command is answered with `progress_steps` tqdm-style lines on
/// stderr and then `1 image(s) generated in 0.5s` on stdout.
#[derive(Debug, Clone)]
pub struct ScriptedLauncher {
    script: WorkerScript,
    log: Arc<WorkerLog>,
}

impl ScriptedLauncher {
    pub fn new(script: WorkerScript) -> Self {
        Self {
            script,
            log: Arc::new(WorkerLog::default()),
        }
    }

    pub fn log(&self) -> Arc<WorkerLog> {
        self.log.clone()
    }
}

impl Default for ScriptedLauncher {
    fn default() -> Self {
        Self::new(WorkerScript::default())
    }
}

#[derive(Debug)]
struct FakeControl {
    log: Arc<WorkerLog>,
    interrupted: Arc<AtomicBool>,
    kill_tx: watch::Sender<bool>,
}

impl WorkerControl for FakeControl {
    fn interrupt(&self) -> Result<()> {
        self.log.interrupts.fetch_add(1, Ordering::SeqCst);
        self.interrupted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn terminate_tree(&self) -> Result<()> {
        self.log.kills.fetch_add(1, Ordering::SeqCst);
        self.kill_tx.send_replace(true);
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

impl WorkerLauncher for ScriptedLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
    ) -> Pin<Box<dyn Future<Output = Result<LaunchedWorker>> + Send + '_>> {
        let spec = spec.clone();
        Box::pin(async move {
            if self.script.fail_launch {
                return Err(SweepError::Other(anyhow::anyhow!(
                    "failed to spawn {}",
                    spec.program
                )));
            }
            self.log.launches.fetch_add(1, Ordering::SeqCst);
            self.log.specs.lock().unwrap().push(spec);

            let (stdin, worker_stdin) = tokio::io::duplex(64 * 1024);
            let (worker_stdout, stdout) = tokio::io::duplex(64 * 1024);
            let (worker_stderr, stderr) = tokio::io::duplex(64 * 1024);

            let interrupted = Arc::new(AtomicBool::new(false));
            let (kill_tx, mut kill_rx) = watch::channel(false);
            let (exit_tx, exit_rx) = oneshot::channel();

            let worker = FakeWorker {
                script: self.script.clone(),
                log: self.log.clone(),
                interrupted: interrupted.clone(),
                stdout: worker_stdout,
                stderr: worker_stderr,
            };
            tokio::spawn(async move {
                let code = tokio::select! {
                    _ = kill_rx.wait_for(|killed| *killed) => None,
                    code = worker.run(worker_stdin) => code,
                };
                let _ = exit_tx.send(code);
            });

            Ok(LaunchedWorker {
                stdin: Box::new(stdin),
                stdout: Box::new(stdout),
                stderr: Box::new(stderr),
                control: Arc::new(FakeControl {
                    log: self.log.clone(),
                    interrupted,
                    kill_tx,
                }),
                exit: Box::pin(async move { exit_rx.await.ok().flatten() }),
            })
        })
    }
}

struct FakeWorker {
    script: WorkerScript,
    log: Arc<WorkerLog>,
    interrupted: Arc<AtomicBool>,
    stdout: DuplexStream,
    stderr: DuplexStream,
}

impl FakeWorker {
    async fn run(mut self, stdin: DuplexStream) -> Option<i32> {
        for line in self.script.startup_lines.clone() {
            self.say_out(&line).await;
        }
        if let Some(ready) = self.script.ready_line.clone() {
            self.say_out(&ready).await;
        }

        let mut lines = BufReader::new(stdin).lines();
        let mut jobs = 0;
        while let Ok(Some(command)) = lines.next_line().await {
            self.log.commands.lock().unwrap().push(command.clone());
            if command.starts_with('!') {
                continue;
            }

            jobs += 1;
            if self.script.exit_after_jobs.is_some_and(|n| jobs > n) {
                self.say_err("Traceback (most recent call last):").await;
                return Some(1);
            }
            self.interrupted.store(false, Ordering::SeqCst);
            self.generate().await;
        }
        Some(0)
    }

    async fn generate(&mut self) {
        let phases: Vec<Option<String>> = if self.script.phase_lines.is_empty() {
            vec![None]
        } else {
            self.script.phase_lines.iter().cloned().map(Some).collect()
        };

        for phase in phases {
            if let Some(line) = phase {
                self.say_out(&line).await;
                // Keep the phase line ahead of the next stderr bar.
                sleep(self.script.step_delay).await;
            }
            if !self.progress_bar().await {
                return;
            }
        }
        self.say_out("1 image(s) generated in 0.5s").await;
    }

    /// One tqdm-style bar; `false` when it was cut short by an interrupt.
    async fn progress_bar(&mut self) -> bool {
        let steps = self.script.progress_steps.max(1);
        let mut step = 0;
        loop {
            if !self.script.ignore_interrupts && self.interrupted.load(Ordering::SeqCst) {
                self.say_out("KeyboardInterrupt").await;
                return false;
            }
            step += 1;
            if !self.script.endless_progress && step > steps {
                return true;
            }
            let percent = (step.min(steps) * 100) / steps;
            self.say_err(&format!("{percent:3}%|#####     | {step}/{steps}")).await;
            sleep(self.script.step_delay).await;
        }
    }

    async fn say_out(&mut self, line: &str) {
        let _ = self.stdout.write_all(format!("{line}\n").as_bytes()).await;
    }

    async fn say_err(&mut self, line: &str) {
        let _ = self.stderr.write_all(format!("{line}\r").as_bytes()).await;
    }
}
