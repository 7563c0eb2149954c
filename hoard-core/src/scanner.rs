//! Streaming enumeration of files and directories under the media root.
//!
//! Listing is delegated to an external `find`-compatible program whose
//! NUL-separated output is consumed incrementally, so memory stays flat no
//! matter how large the tree is. Hidden entries are pruned by the lister;
//! ignored directories and hidden ancestors are filtered here.

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{HoardError, Result};
use crate::paths::is_hidden_below;

/// What a listing yields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular files, hidden entries pruned.
    Files,
    /// Directories, hidden entries pruned.
    Directories,
    /// Every regular file, hidden ones included.
    AllFiles,
}

#[derive(Clone, Debug)]
struct EntryFilter {
    media_root: PathBuf,
    ignored: Vec<PathBuf>,
}

impl EntryFilter {
    fn is_ignored(&self, path: &Path, kind: EntryKind) -> bool {
        if self.ignored.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }
        kind != EntryKind::AllFiles && is_hidden_below(path, &self.media_root)
    }
}

/// Enumerates files through an external lister process.
#[derive(Clone, Debug)]
pub struct FileScanner {
    program: String,
    filter: EntryFilter,
    progress_interval: u64,
}

impl FileScanner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            program: config.lister_program.clone(),
            filter: EntryFilter {
                media_root: config.media_root.clone(),
                ignored: config.resolved_ignored_directories(),
            },
            progress_interval: config.count_progress_interval.max(1),
        }
    }

    /// Whether `path` would be skipped by a normal file listing.
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.filter.is_ignored(path, EntryKind::Files)
    }

    /// Stream every visible regular file under `roots`.
    ///
    /// Roots that do not exist yield nothing. A root that is itself a file is
    /// yielded directly.
    pub fn stream_files(&self, roots: Vec<PathBuf>) -> impl Stream<Item = Result<PathBuf>> + Send + 'static {
        self.stream_entries(roots, EntryKind::Files)
    }

    pub fn stream_directories(
        &self,
        roots: Vec<PathBuf>,
    ) -> impl Stream<Item = Result<PathBuf>> + Send + 'static {
        self.stream_entries(roots, EntryKind::Directories)
    }

    pub fn stream_entries(
        &self,
        roots: Vec<PathBuf>,
        kind: EntryKind,
    ) -> impl Stream<Item = Result<PathBuf>> + Send + 'static {
        let program = self.program.clone();
        let filter = self.filter.clone();

        try_stream! {
            for root in roots {
                let metadata = match tokio::fs::metadata(&root).await {
                    Ok(metadata) => metadata,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        debug!(target: "scan::lister", root = %root.display(), "root does not exist; nothing to list");
                        continue;
                    }
                    Err(err) => Err(HoardError::from(err))?,
                };

                if !metadata.is_dir() {
                    if kind != EntryKind::Directories && !filter.is_ignored(&root, kind) {
                        yield root;
                    }
                    continue;
                }

                let mut child = spawn_lister(&program, &root, kind)?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    HoardError::ScannerUnavailable(format!("{program}: stdout was not captured"))
                })?;

                let mut segments = BufReader::new(stdout).split(b'\0');
                while let Some(segment) = segments.next_segment().await.map_err(HoardError::from)? {
                    if segment.is_empty() {
                        continue;
                    }
                    let path = PathBuf::from(OsString::from_vec(segment));
                    if filter.is_ignored(&path, kind) {
                        continue;
                    }
                    yield path;
                }

                let status = child.wait().await.map_err(HoardError::from)?;
                if !status.success() {
                    // find exits non-zero on unreadable subtrees; what it did list is still valid.
                    warn!(
                        target: "scan::lister",
                        root = %root.display(),
                        status = %status,
                        "lister exited with errors; listing may be partial"
                    );
                }
            }
        }
    }

    /// Count visible files under `roots`, reporting progress every
    /// `count_progress_interval` files.
    pub async fn count_files<F>(
        &self,
        roots: Vec<PathBuf>,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<u64>
    where
        F: FnMut(u64) + Send,
    {
        let stream = self.stream_files(roots);
        futures::pin_mut!(stream);

        let mut count: u64 = 0;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(HoardError::Cancelled("file count".into()));
                }
                next = stream.next() => next,
            };
            let Some(entry) = next else { break };
            entry?;
            count += 1;
            if count % self.progress_interval == 0 {
                on_progress(count);
                tokio::task::yield_now().await;
            }
        }

        on_progress(count);
        Ok(count)
    }
}

fn spawn_lister(program: &str, root: &Path, kind: EntryKind) -> Result<Child> {
    let mut command = Command::new(program);
    command.arg(root).args(["-mindepth", "1"]);
    match kind {
        EntryKind::Files => {
            command.args(["-name", ".*", "-prune", "-o", "-type", "f", "-print0"]);
        }
        EntryKind::Directories => {
            command.args(["-name", ".*", "-prune", "-o", "-type", "d", "-print0"]);
        }
        EntryKind::AllFiles => {
            command.args(["-type", "f", "-print0"]);
        }
    }

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| HoardError::ScannerUnavailable(format!("{program}: {err}")))
}
