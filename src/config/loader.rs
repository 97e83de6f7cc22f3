// src/config/loader.rs

use std::path::{Path, PathBuf};

use crate::config::model::{RawRunFile, RunFile};
use crate::errors::Result;
use crate::fs::FileSystem;

/// Read and deserialize a run file without semantic validation.
pub fn load_from_path(fs: &dyn FileSystem, path: impl AsRef<Path>) -> Result<RawRunFile> {
    let contents = fs.read_to_string(path.as_ref())?;
    let raw: RawRunFile = toml::from_str(&contents)?;
    Ok(raw)
}

/// Load a run file and validate it into a [`RunFile`].
pub fn load_and_validate(fs: &dyn FileSystem, path: impl AsRef<Path>) -> Result<RunFile> {
    let raw = load_from_path(fs, path)?;
    RunFile::try_from(raw)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("sdsweep.toml")
}
