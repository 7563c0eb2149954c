//! Reconciling the catalog with what is on disk.

use std::collections::BTreeSet;
use std::path::PathBuf;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogMutator, MutationSummary};
use crate::compare::{Comparator, FileGroupDiffs};
use crate::config::non_overlapping_directories;
use crate::context::EngineContext;
use crate::database::directories;
use crate::error::{HoardError, Result};
use crate::events::EngineEvent;
use crate::pipeline::{PipelineSummary, PostProcessor};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub files_seen: u64,
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub directories_added: u64,
    pub directories_removed: u64,
    pub mutation: MutationSummary,
    pub pipeline: PipelineSummary,
}

impl RefreshSummary {
    fn from_diffs(diffs: &FileGroupDiffs) -> Self {
        Self {
            files_seen: diffs.files_seen,
            new: diffs.new.len(),
            modified: diffs.modified.len(),
            deleted: diffs.deleted.len(),
            unchanged: diffs.unchanged.len(),
            ..Default::default()
        }
    }
}

fn check_cancelled(cancel: &CancellationToken, phase: &str) -> Result<()> {
    if cancel.is_cancelled() {
        Err(HoardError::Cancelled(phase.to_string()))
    } else {
        Ok(())
    }
}

/// Run modelers and indexers over un-indexed groups and announce the result.
pub async fn post_process(ctx: &EngineContext, cancel: &CancellationToken) -> Result<PipelineSummary> {
    let summary = PostProcessor::new(&ctx.pool, &ctx.hooks, ctx.config.pipeline_batch_size)
        .run(cancel)
        .await?;
    if summary.batches > 0 {
        ctx.emit(EngineEvent::ModelingCompleted {
            groups: summary.modeled,
        })
        .await;
        ctx.emit(EngineEvent::IndexingCompleted {
            groups: summary.indexed,
        })
        .await;
    }
    Ok(summary)
}

/// Drives comparison, catalog mutation, directory bookkeeping, and
/// post-processing for a set of roots.
#[derive(Debug)]
pub struct Refresher<'a> {
    ctx: &'a EngineContext,
}

impl<'a> Refresher<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Refresh directories. An empty `paths` (or one naming the media root)
    /// refreshes everything, which first requires the media root to look
    /// mounted.
    pub async fn refresh<F>(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<RefreshSummary>
    where
        F: FnMut(u64) + Send,
    {
        let media_root = self.ctx.media_root.path().to_path_buf();
        let resolved = paths
            .iter()
            .map(|path| self.ctx.media_root.ensure_within(path))
            .collect::<Result<Vec<_>>>()?;
        let global = resolved.is_empty() || resolved.iter().any(|p| self.ctx.media_root.is_root(p));

        let roots = if global {
            self.ensure_media_root_available().await?;
            vec![media_root]
        } else {
            non_overlapping_directories(resolved)
        };

        self.ctx
            .emit(EngineEvent::DiscoveryStarted {
                paths: if global { Vec::new() } else { roots.clone() },
            })
            .await;
        if !global {
            for root in &roots {
                self.ctx
                    .emit(EngineEvent::DirectoryRefreshStarted { path: root.clone() })
                    .await;
            }
        }

        let idempotency = Uuid::now_v7().to_string();
        let diffs = {
            let mut conn = self.ctx.pool.acquire().await?;
            Comparator::new(&self.ctx.scanner, &self.ctx.config)
                .compare(&mut conn, &roots, cancel, on_progress)
                .await?
        };

        let mut summary = self.apply(&diffs, &idempotency, cancel).await?;

        check_cancelled(cancel, "directory refresh")?;
        let (added, removed) = self.sync_directories(&roots, cancel).await?;
        summary.directories_added = added;
        summary.directories_removed = removed;

        check_cancelled(cancel, "post-processing")?;
        summary.pipeline = post_process(self.ctx, cancel).await?;

        if !global {
            for root in &roots {
                self.ctx
                    .emit(EngineEvent::DirectoryRefreshCompleted { path: root.clone() })
                    .await;
            }
        }

        info!(
            target: "scan::refresh",
            roots = roots.len(),
            files = summary.files_seen,
            new = summary.new,
            modified = summary.modified,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            "refresh complete"
        );
        Ok(summary)
    }

    /// Refresh only the groups that `paths` belong to, without counting or
    /// walking directories.
    pub async fn refresh_files(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary> {
        let resolved = paths
            .iter()
            .map(|path| self.ctx.media_root.ensure_within(path))
            .collect::<Result<Vec<_>>>()?;

        self.ctx
            .emit(EngineEvent::DiscoveryStarted {
                paths: resolved.clone(),
            })
            .await;

        let idempotency = Uuid::now_v7().to_string();
        let diffs = {
            let mut conn = self.ctx.pool.acquire().await?;
            Comparator::new(&self.ctx.scanner, &self.ctx.config)
                .compare_paths(&mut conn, &resolved)
                .await?
        };

        let mut summary = self.apply(&diffs, &idempotency, cancel).await?;

        let parents: Vec<PathBuf> = resolved
            .iter()
            .filter_map(|path| path.parent())
            .filter(|parent| {
                !self.ctx.media_root.is_root(parent) && self.ctx.media_root.contains(parent)
            })
            .map(|parent| parent.to_path_buf())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|parent| parent.is_dir())
            .collect();
        if !parents.is_empty() {
            let mut conn = self.ctx.pool.acquire().await?;
            summary.directories_added = directories::upsert_directories(&mut conn, &parents).await?;
        }

        summary.pipeline = post_process(self.ctx, cancel).await?;
        Ok(summary)
    }

    async fn apply(
        &self,
        diffs: &FileGroupDiffs,
        idempotency: &str,
        cancel: &CancellationToken,
    ) -> Result<RefreshSummary> {
        self.ctx
            .emit(EngineEvent::DiscoveryCompleted {
                new: diffs.new.len(),
                modified: diffs.modified.len(),
                deleted: diffs.deleted.len(),
            })
            .await;

        let mut summary = RefreshSummary::from_diffs(diffs);
        summary.mutation = CatalogMutator::new(&self.ctx.pool, &self.ctx.config)
            .apply(diffs, idempotency, cancel)
            .await?;
        if summary.mutation.tags_changed {
            self.ctx.emit(EngineEvent::TagsChanged { tag: None }).await;
        }
        Ok(summary)
    }

    /// Refuse a global refresh when the media root is missing or shows only
    /// hidden or ignored entries; an unmounted drive must not wipe the catalog.
    async fn ensure_media_root_available(&self) -> Result<()> {
        let root = self.ctx.media_root.path();
        let unavailable = || HoardError::MediaRootUnavailable(root.to_path_buf());

        let mut entries = tokio::fs::read_dir(root).await.map_err(|_| unavailable())?;
        while let Some(entry) = entries.next_entry().await? {
            if !self.ctx.scanner.is_ignored(&entry.path()) {
                return Ok(());
            }
        }
        warn!(
            target: "scan::refresh",
            root = %root.display(),
            "media root has no visible entries; refusing to refresh"
        );
        Err(unavailable())
    }

    /// Record every directory under `roots` and forget the ones that are gone.
    async fn sync_directories(
        &self,
        roots: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<(u64, u64)> {
        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
        for root in roots {
            if !self.ctx.media_root.is_root(root) && root.is_dir() {
                seen.insert(root.clone());
            }
        }

        let stream = self.ctx.scanner.stream_directories(roots.to_vec());
        futures::pin_mut!(stream);
        while let Some(dir) = stream.next().await {
            seen.insert(dir?);
            if seen.len() % 1_000 == 0 {
                check_cancelled(cancel, "directory refresh")?;
            }
        }

        let seen_list: Vec<PathBuf> = seen.iter().cloned().collect();
        let mut tx = self.ctx.pool.begin().await?;
        let added = directories::upsert_directories(&mut tx, &seen_list).await?;

        let mut stale = Vec::new();
        for root in roots {
            stale.extend(
                directories::fetch_under(&mut tx, root)
                    .await?
                    .into_iter()
                    .filter(|known| !seen.contains(known)),
            );
        }
        let removed = directories::delete_directories(&mut tx, &stale).await?;
        tx.commit().await?;
        Ok((added, removed))
    }
}
