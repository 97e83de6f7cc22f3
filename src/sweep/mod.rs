// src/sweep/mod.rs

//! Parameter sweep model and its expansion into jobs.
//!
//! Everything in this module is pure: no IO, no async.

pub mod expand;
pub mod order;
pub mod spec;
pub mod values;

pub use expand::{Expander, Job, describe_count, expand, first_last_seed};
pub use order::{Axis, AxisOrder};
pub use spec::{FineTune, GenerationFlags, Resolution, SweepSpec};
