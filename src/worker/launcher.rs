// src/worker/launcher.rs

//! Process creation for the worker.
//!
//! The supervisor talks to a [`WorkerLauncher`] instead of spawning
//! processes itself, so tests can supply scripted in-memory workers.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tracing::info;

use crate::backend::LaunchSpec;
use crate::errors::Result;
use crate::worker::control::{ProcessGroupControl, WorkerControl};

/// Resolves to the exit code once the worker process has ended.
pub type ExitFuture = Pin<Box<dyn Future<Output = Option<i32>> + Send>>;

/// The pipes and handles of a freshly launched worker.
pub struct LaunchedWorker {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    pub control: Arc<dyn WorkerControl>,
    pub exit: ExitFuture,
}

pub trait WorkerLauncher: Send + Sync {
    fn launch(
        &self,
        spec: &LaunchSpec,
    ) -> Pin<Box<dyn Future<Output = Result<LaunchedWorker>> + Send + '_>>;
}

/// Launches the worker as a real OS process.
///
/// The child gets its own process group so interrupts and kills reach
/// everything it spawns. On Linux it also receives SIGKILL when this
/// process dies, and `kill_on_drop` covers the remaining exits.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
    ) -> Pin<Box<dyn Future<Output = Result<LaunchedWorker>> + Send + '_>> {
        let spec = spec.clone();
        Box::pin(async move { spawn_process(&spec) })
    }
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal(cmd: &mut Command) {
    // SAFETY: prctl is async-signal-safe and touches no shared state.
    unsafe {
        cmd.pre_exec(|| {
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
fn set_parent_death_signal(_cmd: &mut Command) {}

fn spawn_process(spec: &LaunchSpec) -> Result<LaunchedWorker> {
    info!(command = %spec, "starting worker process");

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    cmd.process_group(0);

    set_parent_death_signal(&mut cmd);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning worker '{}'", spec.program))?;

    let pid = child
        .id()
        .context("worker exited before its pid could be read")?;
    let stdin = child.stdin.take().context("worker stdin not captured")?;
    let stdout = child.stdout.take().context("worker stdout not captured")?;
    let stderr = child.stderr.take().context("worker stderr not captured")?;

    // The child moves into the exit future; dropping that future kills it.
    let exit: ExitFuture = Box::pin(async move {
        match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(error = %e, "waiting for worker failed");
                None
            }
        }
    });

    Ok(LaunchedWorker {
        stdin: Box::new(stdin),
        stdout: Box::new(stdout),
        stderr: Box::new(stderr),
        control: Arc::new(ProcessGroupControl::new(pid)),
        exit,
    })
}
