// src/lib.rs

pub mod artifacts;
pub mod backend;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod output;
pub mod protocol;
pub mod sweep;
pub mod types;
pub mod worker;

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::cancel::{CancelHandle, NoopRunControl};
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::engine::{Orchestrator, RunPlan, RunReport, RunRequest, RunStatus};
use crate::fs::{FileSystem, RealFileSystem};
use crate::worker::ProcessLauncher;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - run file loading
/// - one orchestrator (and so one worker) shared by every sweep
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let mut file = load_and_validate(fs.as_ref(), &args.config)?;
    if let Some(backend) = args.backend {
        file = file.with_backend(backend.into());
    }
    let requests = file.requests();

    if args.dry_run {
        return print_dry_run(&requests, fs.as_ref());
    }

    let cancel = CancelHandle::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            cancel.cancel("interrupted by user");
        });
    }

    let mut orchestrator = Orchestrator::new(ProcessLauncher, fs);
    let mut failures = 0;

    for (i, request) in requests.iter().enumerate() {
        if cancel.is_canceled() {
            info!(remaining = requests.len() - i, "skipping remaining sweeps");
            break;
        }

        info!(sweep = i + 1, of = requests.len(), "starting sweep");
        let report = orchestrator.run(request, &cancel, &NoopRunControl).await;
        print_report(i + 1, &report);
        if matches!(report.status, RunStatus::Failed(_)) {
            failures += 1;
        }
    }

    orchestrator.shutdown().await;

    if failures > 0 {
        bail!("{failures} sweep(s) failed");
    }
    Ok(())
}

fn print_report(number: usize, report: &RunReport) {
    println!(
        "sweep {number}: {} ({}/{} images, {} rejected, {:.1}s)",
        report.status,
        report.completed,
        report.sent,
        report.rejected,
        report.elapsed.as_secs_f32()
    );
    for artifact in &report.artifacts {
        println!("  {}", artifact.display());
    }
    if let RunStatus::Failed(_) = report.status {
        println!("  last worker output:");
        for line in &report.log {
            println!("    {line}");
        }
    }
}

/// Print every sweep's worker command and job lines without launching.
fn print_dry_run(requests: &[RunRequest], fs: &dyn FileSystem) -> Result<()> {
    println!("sdsweep dry-run");

    for (i, request) in requests.iter().enumerate() {
        let plan = RunPlan::prepare(request, fs)?;
        println!();
        println!("sweep {} ({} jobs):", i + 1, plan.jobs.len());
        println!("  backend: {}", plan.adapter.kind());
        println!("  worker: {}", plan.launch);
        println!("  signature: {}", plan.signature);

        for (job, command) in plan.jobs.iter().zip(plan.commands(request)) {
            match command {
                Ok(line) => println!("  [{}] {line}", job.index),
                Err(reason) => println!("  [{}] rejected: {reason}", job.index),
            }
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
