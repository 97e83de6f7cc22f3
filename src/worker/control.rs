// src/worker/control.rs

//! Signalling of the worker process tree.

use std::fmt;

use crate::errors::Result;

/// Interrupt / kill access to a running worker.
pub trait WorkerControl: Send + Sync + fmt::Debug {
    /// Ask the worker to abort its current step (Ctrl-C equivalent).
    fn interrupt(&self) -> Result<()>;

    /// Kill the worker and every process it spawned.
    fn terminate_tree(&self) -> Result<()>;

    fn pid(&self) -> Option<u32>;
}

/// Control for a worker started in its own process group.
#[derive(Debug, Clone, Copy)]
pub struct ProcessGroupControl {
    pid: u32,
}

impl ProcessGroupControl {
    pub fn new(pid: u32) -> Self {
        Self { pid }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| anyhow::anyhow!("pid {pid} out of range"))?;
    // SAFETY: kill(2) with a negative pid signals the process group; no
    // memory is shared with the callee.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    // The group is already gone.
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err.into())
}

#[cfg(unix)]
impl WorkerControl for ProcessGroupControl {
    fn interrupt(&self) -> Result<()> {
        signal_group(self.pid, libc::SIGINT)
    }

    fn terminate_tree(&self) -> Result<()> {
        signal_group(self.pid, libc::SIGKILL)
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}

#[cfg(not(unix))]
impl WorkerControl for ProcessGroupControl {
    fn interrupt(&self) -> Result<()> {
        Err(anyhow::anyhow!("interrupting the worker is only supported on Unix").into())
    }

    fn terminate_tree(&self) -> Result<()> {
        let status = std::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &self.pid.to_string()])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("taskkill exited with {status}").into())
        }
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}
