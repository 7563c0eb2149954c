use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// Rename `from` to `to`, copying across filesystems when a rename cannot.
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::CrossesDevices => {
            debug!(
                target: "files::move",
                from = %from.display(),
                to = %to.display(),
                "rename crosses devices; copying"
            );
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Create `dir` and any missing ancestors, recording each one created
/// (outermost first).
pub async fn create_dirs_recorded(dir: &Path, created: &mut Vec<PathBuf>) -> Result<()> {
    let mut missing = Vec::new();
    let mut cursor = Some(dir);
    while let Some(current) = cursor {
        if tokio::fs::try_exists(current).await? {
            break;
        }
        missing.push(current.to_path_buf());
        cursor = current.parent();
    }

    for path in missing.into_iter().rev() {
        match tokio::fs::create_dir(&path).await {
            Ok(()) => created.push(path),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Remove `dir` if it is empty. Returns whether it was removed.
pub async fn remove_dir_if_empty(dir: &Path) -> bool {
    tokio::fs::remove_dir(dir).await.is_ok()
}

/// Remove every empty directory under `root`, deepest first, and `root`
/// itself when `include_root` is set and it ends up empty.
pub async fn remove_empty_dirs(root: &Path, include_root: bool) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                let path = entry.path();
                dirs.push(path.clone());
                stack.push(path);
            }
        }
    }

    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    if include_root {
        dirs.push(root.to_path_buf());
    }

    let mut removed = Vec::new();
    for dir in dirs {
        if remove_dir_if_empty(&dir).await {
            removed.push(dir);
        }
    }
    Ok(removed)
}
