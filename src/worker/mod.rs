// src/worker/mod.rs

//! Worker process lifetime: launch, reuse-or-restart, readiness, stop.

pub mod control;
pub mod launcher;
pub mod supervisor;

pub use control::{ProcessGroupControl, WorkerControl};
pub use launcher::{ExitFuture, LaunchedWorker, ProcessLauncher, WorkerLauncher};
pub use supervisor::{ProcessHandle, Readiness, Supervisor, WorkerState};
