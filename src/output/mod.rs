// src/output/mod.rs

//! Interpretation of worker output: marker classification, per-run state
//! and progress publication.

pub mod interpreter;
pub mod markers;
pub mod router;

pub use interpreter::{ArtifactSink, Interpreter, ProgressSnapshot, RECENT_LINES};
pub use markers::{LineEvent, LineMarkers, MarkerKind};
pub use router::OutputRouter;
