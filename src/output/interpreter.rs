// src/output/interpreter.rs

//! Per-run interpretation of worker output.
//!
//! One [`Interpreter`] exists per run. Both reader tasks feed it through the
//! [`OutputRouter`](super::router::OutputRouter); it keeps the mutable
//! [`RunState`] behind a short-lived `std::sync::Mutex` and publishes
//! progress through `watch` channels.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::logging::WORKER_OUTPUT;
use crate::output::markers::{LineEvent, LineMarkers};
use crate::protocol::reader::OutputStream;

/// Number of recent lines kept for cancellation decisions and reports.
pub const RECENT_LINES: usize = 15;

/// Progress as seen by a presentation layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub target: usize,
    /// Progress of the image currently being generated.
    pub image_percent: u32,
    /// Progress of the whole run.
    pub run_percent: u32,
    pub eta: Option<Duration>,
}

/// Receives completion notifications (e.g. to look for new files).
pub trait ArtifactSink: Send + Sync {
    fn image_completed(&self, completed: usize, target: usize);
}

#[derive(Debug, Clone)]
struct RecentLine {
    text: String,
    event: LineEvent,
}

#[derive(Debug)]
struct RunState {
    recent: VecDeque<RecentLine>,
    last_line_at: Option<Instant>,
    current_job: Option<usize>,
    completions: Vec<Instant>,
    phase: usize,
    errors: usize,
    exit: Option<Option<i32>>,
    progress: ProgressSnapshot,
}

pub struct Interpreter {
    markers: LineMarkers,
    state: Mutex<RunState>,
    progress_tx: watch::Sender<ProgressSnapshot>,
    ready_tx: watch::Sender<bool>,
    exit_tx: watch::Sender<Option<Option<i32>>>,
    sink: Option<Arc<dyn ArtifactSink>>,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("progress", &*self.progress_tx.borrow())
            .field("ready", &*self.ready_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    pub fn new(markers: LineMarkers, target: usize) -> Self {
        let progress = ProgressSnapshot {
            target,
            ..ProgressSnapshot::default()
        };
        let (progress_tx, _) = watch::channel(progress.clone());
        let (ready_tx, _) = watch::channel(false);
        let (exit_tx, _) = watch::channel(None);

        Self {
            markers,
            state: Mutex::new(RunState {
                recent: VecDeque::with_capacity(RECENT_LINES),
                last_line_at: None,
                current_job: None,
                completions: Vec::new(),
                phase: 0,
                errors: 0,
                exit: None,
                progress,
            }),
            progress_tx,
            ready_tx,
            exit_tx,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Treat the worker as ready without waiting for a marker (reused
    /// worker).
    pub fn mark_ready(&self) {
        self.ready_tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    pub fn subscribe_exit(&self) -> watch::Receiver<Option<Option<i32>>> {
        self.exit_tx.subscribe()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress_tx.borrow().clone()
    }

    /// Change the number of images the run waits for (jobs actually sent).
    pub fn set_target(&self, target: usize) {
        let snapshot = {
            let mut state = self.lock();
            let progress = &mut state.progress;
            progress.target = target;
            progress.run_percent =
                run_percent(progress.completed, target, progress.image_percent);
            progress.clone()
        };
        self.progress_tx.send_replace(snapshot);
    }

    /// Record that the driver wrote the command of job `index`.
    pub fn mark_job_sent(&self, index: usize) {
        self.lock().current_job = Some(index);
    }

    /// Index of the job most recently sent, if any.
    pub fn current_job(&self) -> Option<usize> {
        self.lock().current_job
    }

    /// Time since the last non-empty line, `None` before the first one.
    pub fn since_last_line(&self) -> Option<Duration> {
        self.lock().last_line_at.map(|t| t.elapsed())
    }

    /// Whether the recent lines show that generation actually started
    /// (progress output or a reported error).
    pub fn has_generation_evidence(&self) -> bool {
        self.lock()
            .recent
            .iter()
            .any(|l| matches!(l.event, LineEvent::Progress(_) | LineEvent::Error))
    }

    /// Recent lines, oldest first.
    pub fn recent_lines(&self) -> Vec<String> {
        self.lock().recent.iter().map(|l| l.text.clone()).collect()
    }

    pub fn error_count(&self) -> usize {
        self.lock().errors
    }

    pub fn completion_times(&self) -> Vec<Instant> {
        self.lock().completions.clone()
    }

    /// Called by the exit watcher when the worker process ends.
    pub fn worker_exited(&self, code: Option<i32>) {
        self.lock().exit = Some(code);
        self.exit_tx.send_replace(Some(code));
    }

    pub fn exit_status(&self) -> Option<Option<i32>> {
        self.lock().exit
    }

    /// Classify one line and apply its effect.
    pub fn handle_line(&self, stream: OutputStream, line: &str) {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return;
        }

        let event = self.markers.classify(line);
        let now = Instant::now();

        let (snapshot, notify) = {
            let mut state = self.lock();
            state.last_line_at = Some(now);
            if state.recent.len() == RECENT_LINES {
                state.recent.pop_front();
            }
            state.recent.push_back(RecentLine {
                text: line.to_string(),
                event: event.clone(),
            });

            match &event {
                LineEvent::Unrecognized | LineEvent::Ready | LineEvent::ModelLoaded => (None, None),
                LineEvent::Error => {
                    state.errors += 1;
                    (None, None)
                }
                LineEvent::Phase(idx) => {
                    state.phase = *idx;
                    (None, None)
                }
                LineEvent::Progress(percent) => {
                    let image_percent = self.phase_percent(state.phase, *percent);
                    let progress = &mut state.progress;
                    progress.image_percent = image_percent;
                    progress.run_percent = run_percent(progress.completed, progress.target, image_percent);
                    (Some(progress.clone()), None)
                }
                LineEvent::Completed { count, seconds } => {
                    let reported = (*count).max(1);
                    // The worker's count is untrusted; never exceed the target.
                    let outstanding = state.progress.target.saturating_sub(state.progress.completed);
                    let count = (reported as usize).min(outstanding);
                    state.completions.extend(std::iter::repeat_n(now, count));
                    state.phase = 0;

                    let progress = &mut state.progress;
                    progress.completed += count;
                    progress.image_percent = 0;
                    progress.run_percent = run_percent(progress.completed, progress.target, 0);
                    let remaining = progress.target.saturating_sub(progress.completed);
                    progress.eta = seconds
                        .filter(|s| *s > 0.0)
                        .and_then(|s| eta(s / reported as f32, remaining));

                    let snapshot = progress.clone();
                    (Some(snapshot.clone()), Some((snapshot, *seconds)))
                }
            }
        };

        match &event {
            LineEvent::Ready => {
                info!(line, "worker ready");
                self.ready_tx.send_replace(true);
            }
            LineEvent::ModelLoaded => info!(line, "model loaded"),
            LineEvent::Error => warn!(?stream, line, "worker reported an error"),
            LineEvent::Unrecognized | LineEvent::Phase(_) | LineEvent::Progress(_) => {
                debug!(target: WORKER_OUTPUT, ?stream, "{}", line)
            }
            LineEvent::Completed { .. } => {}
        }

        if let Some(snapshot) = snapshot {
            self.progress_tx.send_replace(snapshot);
        }

        if let Some((snapshot, seconds)) = notify {
            info!(
                completed = snapshot.completed,
                target = snapshot.target,
                seconds = seconds.unwrap_or_default(),
                eta_secs = snapshot.eta.map(|d| d.as_secs()),
                "image generated"
            );
            if let Some(sink) = &self.sink {
                sink.image_completed(snapshot.completed, snapshot.target);
            }
        }
    }

    fn phase_percent(&self, phase: usize, percent: u32) -> u32 {
        match self.markers.phases.get(phase) {
            Some(p) => (p.offset + percent as f32 * p.weight).round().clamp(0.0, 100.0) as u32,
            None => percent.min(100),
        }
    }
}

/// Remaining time at `per_image` seconds each; `None` when it does not fit
/// in a [`Duration`].
fn eta(per_image: f32, remaining: usize) -> Option<Duration> {
    Duration::try_from_secs_f32(per_image * remaining as f32).ok()
}

fn run_percent(completed: usize, target: usize, image_percent: u32) -> u32 {
    if target == 0 {
        return 0;
    }
    let done = completed as f32 + image_percent as f32 / 100.0;
    ((done / target as f32) * 100.0).round().clamp(0.0, 100.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn markers() -> LineMarkers {
        LineMarkers::new("^ready$")
            .and_then(|m| m.with_phase("Running base model", 0.7, 0.0))
            .and_then(|m| m.with_phase("Running refine model", 0.3, 70.0))
            .and_then(|m| m.with_progress(r"(\d+)%\|", None))
            .and_then(|m| m.with_completion(r"(?P<count>\d+) image\(s\) generated in (?P<secs>[\d.]+)s"))
            .and_then(|m| m.with_error("error occurred"))
            .unwrap()
    }

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl ArtifactSink for CountingSink {
        fn image_completed(&self, _completed: usize, _target: usize) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn readiness_marker_sets_ready() {
        let interp = Interpreter::new(markers(), 2);
        let ready = interp.subscribe_ready();
        assert!(!*ready.borrow());
        interp.handle_line(OutputStream::Stdout, "ready");
        assert!(*ready.borrow());
    }

    #[test]
    fn phases_weight_progress() {
        let interp = Interpreter::new(markers(), 2);
        interp.handle_line(OutputStream::Stdout, "Running base model");
        interp.handle_line(OutputStream::Stderr, "60%|######");
        assert_eq!(interp.progress().image_percent, 42);
        assert_eq!(interp.progress().run_percent, 21);

        interp.handle_line(OutputStream::Stdout, "Running refine model");
        interp.handle_line(OutputStream::Stderr, "100%|##########");
        assert_eq!(interp.progress().image_percent, 100);
    }

    #[test]
    fn completion_updates_count_eta_and_sink() {
        let sink = Arc::new(CountingSink::default());
        let interp = Interpreter::new(markers(), 4).with_sink(sink.clone());
        interp.handle_line(OutputStream::Stdout, "1 image(s) generated in 2.5s");

        let p = interp.progress();
        assert_eq!(p.completed, 1);
        assert_eq!(p.run_percent, 25);
        assert_eq!(p.eta, Some(Duration::from_secs_f32(7.5)));
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
        assert_eq!(interp.completion_times().len(), 1);
    }

    #[test]
    fn absurd_completion_lines_are_tolerated() {
        let interp = Interpreter::new(markers(), 2);
        interp.handle_line(
            OutputStream::Stdout,
            "1 image(s) generated in 99999999999999999999999999s",
        );
        let p = interp.progress();
        assert_eq!(p.completed, 1);
        assert_eq!(p.eta, None);

        interp.handle_line(OutputStream::Stdout, "4000000000 image(s) generated in 1.0s");
        let p = interp.progress();
        assert_eq!(p.completed, 2);
        assert_eq!(p.run_percent, 100);
        assert_eq!(interp.completion_times().len(), 2);

        // Still classifying after the bad lines.
        interp.handle_line(OutputStream::Stdout, "An error occurred");
        assert_eq!(interp.error_count(), 1);
    }

    #[test]
    fn unrecognized_lines_only_touch_the_log() {
        let interp = Interpreter::new(markers(), 3);
        interp.handle_line(OutputStream::Stdout, "10%|#");
        let before = interp.progress();

        interp.handle_line(OutputStream::Stdout, "some chatter");
        interp.handle_line(OutputStream::Stderr, "   ");

        assert_eq!(interp.progress(), before);
        assert_eq!(interp.error_count(), 0);
        assert_eq!(interp.recent_lines(), vec!["10%|#", "some chatter"]);
    }

    #[test]
    fn recent_buffer_is_bounded_and_tracks_evidence() {
        let interp = Interpreter::new(markers(), 1);
        interp.handle_line(OutputStream::Stdout, "An error occurred");
        assert!(interp.has_generation_evidence());

        for i in 0..RECENT_LINES {
            interp.handle_line(OutputStream::Stdout, &format!("line {i}"));
        }
        assert_eq!(interp.recent_lines().len(), RECENT_LINES);
        assert!(!interp.has_generation_evidence());
    }
}
