//! Moving and renaming file groups and directories.
//!
//! A move is planned in full before anything on disk changes: conflicts and
//! missing sources are rejected up front. The executor then works through
//! the plan in chunks, deepest paths first, and rolls everything back if a
//! chunk fails or the task is cancelled.

pub mod execute;
pub mod fs_ops;
pub mod plan;

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::context::EngineContext;
use crate::error::Result;

pub use execute::{MoveExecutor, MoveOutcome};
pub use plan::{GroupRelocation, MoveEntry, MovePlan, MovePlanner};

/// Plan and execute moving `sources` into `destination`.
pub async fn move_paths<F>(
    ctx: &EngineContext,
    sources: &[PathBuf],
    destination: &Path,
    cancel: &CancellationToken,
    on_progress: F,
) -> Result<MoveOutcome>
where
    F: FnMut(u64, u64) + Send,
{
    let plan = MovePlanner::new(ctx).plan_move(sources, destination).await?;
    MoveExecutor::new(ctx).execute(&plan, cancel, on_progress).await
}

/// Plan and execute renaming `path` to `new_name` within its directory.
pub async fn rename_path<F>(
    ctx: &EngineContext,
    path: &Path,
    new_name: &str,
    cancel: &CancellationToken,
    on_progress: F,
) -> Result<MoveOutcome>
where
    F: FnMut(u64, u64) + Send,
{
    let plan = MovePlanner::new(ctx).plan_rename(path, new_name).await?;
    MoveExecutor::new(ctx).execute(&plan, cancel, on_progress).await
}
