// src/artifacts.rs

//! Observation of images the worker writes to its output directory.
//!
//! Files are only listed, never renamed or moved.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use globset::{Glob, GlobMatcher};
use tracing::{debug, warn};

use crate::errors::{Result, SweepError};
use crate::fs::FileSystem;
use crate::output::interpreter::ArtifactSink;

pub const DEFAULT_PATTERN: &str = "*.png";

/// Lists files matching a glob that were modified after the run started.
///
/// Scans triggered by completion events run on the blocking pool, so the
/// output reader never waits on the filesystem.
#[derive(Debug)]
pub struct ArtifactCollector {
    scanner: Arc<Scanner>,
}

#[derive(Debug)]
struct Scanner {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
    matcher: GlobMatcher,
    since: SystemTime,
    found: Mutex<Vec<PathBuf>>,
}

impl ArtifactCollector {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        dir: impl Into<PathBuf>,
        pattern: &str,
        since: SystemTime,
    ) -> Result<Self> {
        let matcher = Glob::new(pattern)
            .map_err(|e| SweepError::ConfigError(format!("invalid artifact pattern '{pattern}': {e}")))?
            .compile_matcher();

        Ok(Self {
            scanner: Arc::new(Scanner {
                fs,
                dir: dir.into(),
                matcher,
                since,
                found: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Rescan the directory on the current thread; returns new artifacts
    /// oldest first.
    pub fn scan(&self) -> Vec<PathBuf> {
        self.scanner.scan()
    }

    /// [`scan`](Self::scan) on the blocking pool.
    pub async fn scan_async(&self) -> Vec<PathBuf> {
        let scanner = self.scanner.clone();
        match tokio::task::spawn_blocking(move || scanner.scan()).await {
            Ok(new) => new,
            Err(e) => {
                warn!(error = %e, "artifact scan task failed");
                Vec::new()
            }
        }
    }

    /// Every artifact seen so far, in discovery order.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.scanner.lock().clone()
    }
}

impl Scanner {
    fn lock(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.found.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.matcher.is_match(Path::new(name)))
    }

    fn scan(&self) -> Vec<PathBuf> {
        if !self.fs.exists(&self.dir) {
            return Vec::new();
        }

        let entries = match self.fs.read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "listing output directory failed");
                return Vec::new();
            }
        };

        let mut fresh: Vec<(SystemTime, PathBuf)> = entries
            .into_iter()
            .filter(|p| self.fs.is_file(p) && self.matches(p))
            .filter_map(|p| {
                let modified = self.fs.modified(&p).ok()?;
                (modified > self.since).then_some((modified, p))
            })
            .collect();
        fresh.sort();

        let mut found = self.lock();
        let new: Vec<PathBuf> = fresh
            .into_iter()
            .map(|(_, p)| p)
            .filter(|p| !found.contains(p))
            .collect();
        found.extend(new.iter().cloned());
        new
    }
}

impl ArtifactSink for ArtifactCollector {
    fn image_completed(&self, completed: usize, target: usize) {
        let scanner = self.scanner.clone();
        let scan = move || {
            let new = scanner.scan();
            debug!(completed, target, new = new.len(), "scanned for new images");
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(scan);
            }
            Err(_) => scan(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use std::time::Duration;

    #[test]
    fn finds_only_new_matching_files() {
        let fs = MockFileSystem::new();
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        fs.add_file_modified("out/old.png", "", start - Duration::from_secs(5));
        fs.add_file_modified("out/b.png", "", start + Duration::from_secs(2));
        fs.add_file_modified("out/a.png", "", start + Duration::from_secs(1));
        fs.add_file_modified("out/notes.txt", "", start + Duration::from_secs(3));

        let collector =
            ArtifactCollector::new(Arc::new(fs.clone()), "out", DEFAULT_PATTERN, start).unwrap();
        assert_eq!(
            collector.scan(),
            vec![PathBuf::from("out/a.png"), PathBuf::from("out/b.png")]
        );

        fs.add_file_modified("out/c.png", "", start + Duration::from_secs(4));
        collector.image_completed(3, 3);
        assert_eq!(collector.artifacts().len(), 3);
        assert!(collector.scan().is_empty());
    }

    #[tokio::test]
    async fn completion_scans_run_off_the_calling_task() {
        let fs = MockFileSystem::new();
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        fs.add_file_modified("out/a.png", "", start + Duration::from_secs(1));
        let collector =
            ArtifactCollector::new(Arc::new(fs.clone()), "out", DEFAULT_PATTERN, start).unwrap();

        collector.image_completed(1, 2);
        for _ in 0..200 {
            if !collector.artifacts().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(collector.artifacts(), vec![PathBuf::from("out/a.png")]);

        fs.add_file_modified("out/b.png", "", start + Duration::from_secs(2));
        assert_eq!(collector.scan_async().await, vec![PathBuf::from("out/b.png")]);
        assert!(collector.scan_async().await.is_empty());
    }

    #[test]
    fn missing_directory_yields_nothing() {
        let collector = ArtifactCollector::new(
            Arc::new(MockFileSystem::new()),
            "nowhere",
            DEFAULT_PATTERN,
            SystemTime::now(),
        )
        .unwrap();
        assert!(collector.scan().is_empty());
    }

    #[test]
    fn bad_pattern_is_a_config_error() {
        let result = ArtifactCollector::new(
            Arc::new(MockFileSystem::new()),
            "out",
            "[",
            SystemTime::now(),
        );
        assert!(matches!(result, Err(SweepError::ConfigError(_))));
    }
}
