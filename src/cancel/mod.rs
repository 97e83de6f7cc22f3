// src/cancel/mod.rs

//! Cancellation of a running sweep.

pub mod controller;
pub mod handle;

pub use controller::{
    CancelOptions, CancelOutcome, CancellationController, NoopRunControl, RunControl,
};
pub use handle::CancelHandle;
