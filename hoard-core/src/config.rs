use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs that tune scanning, diffing, and moving.
///
/// All fields carry defaults so deployments only override what they need.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Absolute root every stored path is resolved against.
    pub media_root: PathBuf,
    /// Directories never scanned. Relative entries resolve against `media_root`.
    pub ignored_directories: Vec<PathBuf>,
    /// Filesystem entries written to the transient diff table per commit.
    pub scan_batch_size: usize,
    /// File groups upserted per transaction.
    pub upsert_batch_size: usize,
    /// File groups deleted per transaction.
    pub delete_batch_size: usize,
    /// Files moved per chunk before the catalog is flushed.
    pub move_chunk_size: usize,
    /// File groups handed to modelers and indexers per batch.
    pub pipeline_batch_size: usize,
    /// Files counted between progress callbacks.
    pub count_progress_interval: u64,
    /// Allowed drift between on-disk and cataloged modification times.
    pub mtime_epsilon_ms: u64,
    /// External program used to enumerate files (`find` compatible).
    pub lister_program: String,
    /// Poll cadence used while waiting on a job.
    pub wait_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("/media/hoard"),
            ignored_directories: Vec::new(),
            scan_batch_size: 1_000,
            upsert_batch_size: 200,
            delete_batch_size: 200,
            move_chunk_size: 100,
            pipeline_batch_size: 100,
            count_progress_interval: 1_000,
            mtime_epsilon_ms: 1_000,
            lister_program: "find".to_string(),
            wait_poll_interval_ms: 50,
        }
    }
}

impl EngineConfig {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            ..Self::default()
        }
    }

    pub fn mtime_epsilon(&self) -> Duration {
        Duration::from_millis(self.mtime_epsilon_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms.max(1))
    }

    /// Ignored directories as absolute paths.
    pub fn resolved_ignored_directories(&self) -> Vec<PathBuf> {
        self.ignored_directories
            .iter()
            .map(|dir| {
                if dir.is_absolute() {
                    dir.clone()
                } else {
                    self.media_root.join(dir)
                }
            })
            .collect()
    }
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        if result.iter().any(|kept| dir.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(&dir));
        result.push(dir);
    }

    result
}

/// True when `path` is `root` or lies beneath it.
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}
