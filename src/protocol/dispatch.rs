// src/protocol/dispatch.rs

//! Sending a run's jobs to the worker in expansion order.

use tracing::{debug, info, warn};

use crate::backend::BackendAdapter;
use crate::cancel::CancelHandle;
use crate::errors::{Result, SweepError};
use crate::output::interpreter::Interpreter;
use crate::protocol::writer::CommandWriter;
use crate::sweep::{Job, SweepSpec};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub rejected: usize,
    /// Job indices in the order they were written.
    pub sent_indices: Vec<usize>,
    /// Dispatch stopped early because of a cancel request.
    pub canceled: bool,
}

/// Validate, build and write one command per job.
///
/// Rejected jobs are logged and skipped. Fails with `NoValidCommands` when
/// nothing was sent and the run was not canceled; a failed write is
/// returned as is.
pub async fn dispatch(
    writer: &CommandWriter,
    adapter: &dyn BackendAdapter,
    jobs: &[Job],
    sweep: &SweepSpec,
    interpreter: &Interpreter,
    cancel: &CancelHandle,
) -> Result<DispatchReport> {
    let mut report = DispatchReport::default();

    for job in jobs {
        if cancel.is_canceled() {
            report.canceled = true;
            break;
        }

        if let Err(reason) = adapter.validate(job, sweep) {
            let err = SweepError::InvalidJob {
                index: job.index,
                reason,
            };
            warn!(error = %err, "skipping job");
            report.rejected += 1;
            continue;
        }

        let command = adapter.build_command(job, sweep);
        debug!(job = job.index, seed = job.seed, %command, "sending job");

        tokio::select! {
            sent = writer.send(&command) => sent?,
            _ = cancel.canceled() => {
                report.canceled = true;
                break;
            }
        }

        interpreter.mark_job_sent(job.index);
        report.sent += 1;
        report.sent_indices.push(job.index);
    }

    info!(
        sent = report.sent,
        rejected = report.rejected,
        canceled = report.canceled,
        "dispatch finished"
    );

    if report.sent == 0 && !report.canceled {
        return Err(SweepError::NoValidCommands);
    }
    Ok(report)
}
