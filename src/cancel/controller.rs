// src/cancel/controller.rs

//! Two-phase cancellation: interrupt and wait for the worker's output to go
//! quiet, or kill the process tree outright.
//!
//! A soft cancel only makes sense once the worker is generating; while it
//! is still starting up there is nothing to drain, so the tree is killed.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::output::interpreter::Interpreter;
use crate::worker::control::WorkerControl;

/// Toggle for the caller's "start run" affordance.
pub trait RunControl: Send + Sync {
    fn set_enabled(&self, enabled: bool);
}

/// [`RunControl`] for callers without a UI.
#[derive(Debug, Default)]
pub struct NoopRunControl;

impl RunControl for NoopRunControl {
    fn set_enabled(&self, _enabled: bool) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancelOptions {
    /// Interrupts sent right away on a soft cancel.
    pub initial_interrupts: u32,
    /// Wait after the initial interrupts before polling.
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    /// Output newer than this means the worker is still busy.
    pub active_gap: Duration,
    /// Wait after a repeated interrupt.
    pub resend_delay: Duration,
    /// Silence longer than this means the worker has settled.
    pub quiet_gap: Duration,
    /// Give up on the soft path and kill after this long.
    pub safety_bound: Duration,
}

impl Default for CancelOptions {
    fn default() -> Self {
        Self {
            initial_interrupts: 2,
            initial_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(200),
            active_gap: Duration::from_millis(200),
            resend_delay: Duration::from_millis(250),
            quiet_gap: Duration::from_millis(2000),
            safety_bound: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No generation had started; the process tree was killed.
    HardKilled,
    /// The worker went quiet and stays alive for reuse.
    Quiesced { interrupts: u32 },
    /// The safety bound passed; the process tree was killed.
    Escalated { interrupts: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    options: CancelOptions,
}

impl CancellationController {
    pub fn new(options: CancelOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CancelOptions {
        &self.options
    }

    pub async fn cancel(
        &self,
        interpreter: &Interpreter,
        worker: &dyn WorkerControl,
        run_control: &dyn RunControl,
    ) -> CancelOutcome {
        if !interpreter.has_generation_evidence() {
            info!("cancelling before generation started; terminating worker");
            terminate(worker);
            return CancelOutcome::HardKilled;
        }

        info!("cancelling; waiting for the worker to finish its current step");
        run_control.set_enabled(false);

        let mut interrupts = 0;
        for _ in 0..self.options.initial_interrupts {
            interrupt(worker, &mut interrupts);
        }
        sleep(self.options.initial_delay).await;

        let started = Instant::now();
        loop {
            if started.elapsed() > self.options.safety_bound {
                warn!(
                    bound_secs = self.options.safety_bound.as_secs(),
                    interrupts, "worker did not settle; terminating"
                );
                terminate(worker);
                run_control.set_enabled(true);
                return CancelOutcome::Escalated { interrupts };
            }

            if interpreter.exit_status().is_some() {
                debug!("worker exited during cancellation");
                break;
            }

            match interpreter.since_last_line() {
                None => break,
                Some(gap) if gap < self.options.active_gap => {
                    interrupt(worker, &mut interrupts);
                    sleep(self.options.resend_delay).await;
                }
                Some(gap) if gap > self.options.quiet_gap => break,
                Some(_) => {}
            }

            sleep(self.options.poll_interval).await;
        }

        run_control.set_enabled(true);
        info!(interrupts, "worker settled after cancel");
        CancelOutcome::Quiesced { interrupts }
    }
}

fn interrupt(worker: &dyn WorkerControl, count: &mut u32) {
    match worker.interrupt() {
        Ok(()) => *count += 1,
        Err(e) => warn!(error = %e, "failed to interrupt worker"),
    }
}

fn terminate(worker: &dyn WorkerControl) {
    if let Err(e) = worker.terminate_tree() {
        warn!(error = %e, "failed to terminate worker process tree");
    }
}
