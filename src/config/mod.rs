// src/config/mod.rs

//! Run file loading and validation.
//!
//! - `model.rs`: the TOML-backed raw data model and the validated
//!   [`RunFile`].
//! - `loader.rs`: reading a run file through [`FileSystem`](crate::fs::FileSystem).
//! - `validate.rs`: `TryFrom<RawRunFile> for RunFile`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{RawRunFile, RunFile, SweepEntry, ValueList};
pub use validate::parse_duration;
