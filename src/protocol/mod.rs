// src/protocol/mod.rs

//! Line protocol with the worker: commands on stdin, output on
//! stdout/stderr.

pub mod dispatch;
pub mod reader;
pub mod writer;

pub use dispatch::{DispatchReport, dispatch};
pub use reader::{OutputStream, pump_lines, spawn_reader};
pub use writer::CommandWriter;
