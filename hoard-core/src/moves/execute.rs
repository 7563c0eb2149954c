//! Chunked execution of a [`MovePlan`] with full rollback.
//!
//! Every chunk moves its files, then commits the matching catalog rewrite.
//! A journal records each completed step so a failure or cancellation can
//! put the files, the catalog rows, and any created directories back the way
//! they were.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::fs_ops::{create_dirs_recorded, move_file, remove_dir_if_empty, remove_empty_dirs};
use super::plan::{GroupRelocation, MoveEntry, MovePlan};
use crate::catalog::domain;
use crate::context::EngineContext;
use crate::database::file_groups::{self, PrimaryRewrite};
use crate::database::directories;
use crate::error::{HoardError, Result};
use crate::events::EngineEvent;
use crate::refresh::post_process;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MoveOutcome {
    pub moved_files: usize,
    pub relocated_groups: usize,
    pub orphans_deleted: u64,
    pub chunks: usize,
    pub removed_directories: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct MoveJournal {
    destination_preexisted: bool,
    moved: Vec<MoveEntry>,
    created_dirs: Vec<PathBuf>,
    relocated: Vec<GroupRelocation>,
}

fn rewrites_to(relocations: &[GroupRelocation]) -> Vec<PrimaryRewrite> {
    relocations
        .iter()
        .map(|relocation| PrimaryRewrite {
            id: relocation.file_group_id,
            primary_path: relocation.to_primary.clone(),
            directory: relocation.to_directory.clone(),
        })
        .collect()
}

fn rewrites_back(relocations: &[GroupRelocation]) -> Vec<PrimaryRewrite> {
    relocations
        .iter()
        .map(|relocation| PrimaryRewrite {
            id: relocation.file_group_id,
            primary_path: relocation.from_primary.clone(),
            directory: relocation.from_directory.clone(),
        })
        .collect()
}

#[derive(Debug)]
pub struct MoveExecutor<'a> {
    ctx: &'a EngineContext,
    chunk_size: usize,
}

impl<'a> MoveExecutor<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self {
            ctx,
            chunk_size: ctx.config.move_chunk_size.max(1),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Carry out `plan`. `on_progress` receives `(files done, files total)`
    /// after each chunk.
    ///
    /// On error or cancellation every completed step is reverted before the
    /// original error is returned.
    pub async fn execute<F>(
        &self,
        plan: &MovePlan,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<MoveOutcome>
    where
        F: FnMut(u64, u64) + Send,
    {
        let mut journal = MoveJournal {
            destination_preexisted: tokio::fs::try_exists(&plan.destination).await?,
            ..Default::default()
        };

        let mut outcome = match self
            .run_chunks(plan, cancel, &mut journal, &mut on_progress)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    target: "files::move",
                    destination = %plan.destination.display(),
                    error = %err,
                    moved = journal.moved.len(),
                    "move failed; rolling back"
                );
                self.rollback(plan, journal).await;
                self.ctx
                    .emit(EngineEvent::MoveFailed {
                        destination: plan.destination.clone(),
                        error: err.to_string(),
                    })
                    .await;
                return Err(err);
            }
        };

        outcome.removed_directories = self.finish_directories(plan).await;
        self.ctx
            .emit(EngineEvent::MoveCompleted {
                destination: plan.destination.clone(),
                files: outcome.moved_files,
            })
            .await;
        info!(
            target: "files::move",
            destination = %plan.destination.display(),
            files = outcome.moved_files,
            groups = outcome.relocated_groups,
            chunks = outcome.chunks,
            "move complete"
        );

        // Files and catalog are final at this point; only indexing remains.
        post_process(self.ctx, cancel).await?;
        Ok(outcome)
    }

    async fn run_chunks<F>(
        &self,
        plan: &MovePlan,
        cancel: &CancellationToken,
        journal: &mut MoveJournal,
        on_progress: &mut F,
    ) -> Result<MoveOutcome>
    where
        F: FnMut(u64, u64) + Send,
    {
        let mut entries = plan.entries.clone();
        entries.sort_by(|a, b| {
            b.from
                .components()
                .count()
                .cmp(&a.from.components().count())
                .then_with(|| a.from.cmp(&b.from))
        });

        let by_primary: HashMap<&Path, &GroupRelocation> = plan
            .relocations
            .iter()
            .map(|relocation| (relocation.from_primary.as_path(), relocation))
            .collect();
        let mut relocated: HashSet<i64> = HashSet::new();

        let total = entries.len() as u64;
        let mut done: u64 = 0;
        let mut outcome = MoveOutcome::default();

        for chunk in entries.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                return Err(HoardError::Cancelled("move".into()));
            }

            for entry in chunk {
                // Already moved by hand; only the catalog needs rewriting.
                if !tokio::fs::try_exists(&entry.from).await? {
                    continue;
                }
                if let Some(parent) = entry.to.parent() {
                    create_dirs_recorded(parent, &mut journal.created_dirs).await?;
                }
                move_file(&entry.from, &entry.to).await?;
                journal.moved.push(entry.clone());
                outcome.moved_files += 1;
            }

            let chunk_relocations: Vec<GroupRelocation> = chunk
                .iter()
                .filter_map(|entry| by_primary.get(entry.from.as_path()))
                .filter(|relocation| relocated.insert(relocation.file_group_id))
                .map(|relocation| (*relocation).clone())
                .collect();
            outcome.orphans_deleted += self.relocate(&chunk_relocations, journal).await?;
            outcome.relocated_groups += chunk_relocations.len();

            done += chunk.len() as u64;
            outcome.chunks += 1;
            on_progress(done, total);
            tokio::task::yield_now().await;
        }

        // Groups whose primary was not among the planned files.
        let leftovers: Vec<GroupRelocation> = plan
            .relocations
            .iter()
            .filter(|relocation| !relocated.contains(&relocation.file_group_id))
            .cloned()
            .collect();
        if !leftovers.is_empty() {
            if cancel.is_cancelled() {
                return Err(HoardError::Cancelled("move".into()));
            }
            outcome.orphans_deleted += self.relocate(&leftovers, journal).await?;
            outcome.relocated_groups += leftovers.len();
        }

        Ok(outcome)
    }

    /// Clear orphans squatting on the new primary paths, then rewrite the
    /// moved groups. The orphan delete commits first so the rewrite never
    /// trips the unique primary path.
    async fn relocate(
        &self,
        relocations: &[GroupRelocation],
        journal: &mut MoveJournal,
    ) -> Result<u64> {
        if relocations.is_empty() {
            return Ok(0);
        }

        let moving: HashSet<i64> = relocations.iter().map(|r| r.file_group_id).collect();
        let targets: Vec<PathBuf> = relocations.iter().map(|r| r.to_primary.clone()).collect();

        let mut tx = self.ctx.pool.begin().await?;
        let orphans: Vec<i64> = file_groups::ids_at_primary_paths(&mut tx, &targets)
            .await?
            .into_iter()
            .filter(|id| !moving.contains(id))
            .collect();
        let mut orphans_deleted = 0;
        if !orphans.is_empty() {
            warn!(
                target: "files::move",
                orphans = ?orphans,
                "deleting file groups that occupy move targets"
            );
            domain::delete_rows(&mut tx, &orphans).await?;
            orphans_deleted = file_groups::delete_by_ids(&mut tx, &orphans).await?;
        }
        tx.commit().await?;

        let new_dirs: Vec<PathBuf> = relocations
            .iter()
            .map(|r| r.to_directory.clone())
            .filter(|dir| self.ctx.media_root.contains(dir) && !self.ctx.media_root.is_root(dir))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut tx = self.ctx.pool.begin().await?;
        file_groups::rewrite_locations(&mut tx, &rewrites_to(relocations)).await?;
        for relocation in relocations.iter().filter(|r| r.renames_members()) {
            file_groups::set_files(&mut tx, relocation.file_group_id, &relocation.to_files).await?;
        }
        directories::upsert_directories(&mut tx, &new_dirs).await?;
        tx.commit().await?;

        journal.relocated.extend_from_slice(relocations);
        Ok(orphans_deleted)
    }

    /// Undo every journaled step. Failures are logged; the caller reports
    /// the original error.
    async fn rollback(&self, plan: &MovePlan, journal: MoveJournal) {
        for entry in journal.moved.iter().rev() {
            if let Some(parent) = entry.from.parent()
                && let Err(err) = tokio::fs::create_dir_all(parent).await
            {
                error!(target: "files::move", dir = %parent.display(), error = %err, "rollback could not recreate directory");
            }
            if let Err(err) = move_file(&entry.to, &entry.from).await {
                error!(
                    target: "files::move",
                    from = %entry.to.display(),
                    to = %entry.from.display(),
                    error = %err,
                    "rollback could not restore file"
                );
            }
        }

        if !journal.relocated.is_empty() {
            let restore = async {
                let mut tx = self.ctx.pool.begin().await?;
                file_groups::rewrite_locations(&mut tx, &rewrites_back(&journal.relocated)).await?;
                for relocation in journal.relocated.iter().filter(|r| r.renames_members()) {
                    file_groups::set_files(&mut tx, relocation.file_group_id, &relocation.from_files)
                        .await?;
                }
                tx.commit().await?;
                Ok::<_, HoardError>(())
            };
            if let Err(err) = restore.await {
                error!(target: "files::move", error = %err, "rollback could not restore catalog rows");
            }
        }

        for dir in journal.created_dirs.iter().rev() {
            remove_dir_if_empty(dir).await;
        }
        if !journal.destination_preexisted {
            remove_dir_if_empty(&plan.destination).await;
        }

        if let Err(err) = self.forget_directories(&journal.created_dirs).await {
            error!(target: "files::move", error = %err, "rollback could not prune directory rows");
        }
    }

    async fn forget_directories(&self, dirs: &[PathBuf]) -> Result<()> {
        let gone: Vec<PathBuf> = dirs.iter().filter(|dir| !dir.exists()).cloned().collect();
        if gone.is_empty() {
            return Ok(());
        }
        let mut conn = self.ctx.pool.acquire().await?;
        directories::delete_directories(&mut conn, &gone).await?;
        Ok(())
    }

    /// Remove emptied source directories and bring directory rows in line.
    /// Parents of file sources and the media root are never removed.
    async fn finish_directories(&self, plan: &MovePlan) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        for (source, _) in &plan.directories {
            match remove_empty_dirs(source, !self.ctx.media_root.is_root(source)).await {
                Ok(dirs) => removed.extend(dirs),
                Err(err) => warn!(
                    target: "files::move",
                    source = %source.display(),
                    error = %err,
                    "could not clean up source directory"
                ),
            }
        }

        let update = async {
            let mut tx = self.ctx.pool.begin().await?;
            for (source, target) in &plan.directories {
                if !source.exists() {
                    directories::delete_tree(&mut tx, source).await?;
                }
                let mut known = vec![target.clone()];
                known.extend(
                    plan.relocations
                        .iter()
                        .filter(|r| r.to_directory.starts_with(target))
                        .map(|r| r.to_directory.clone()),
                );
                directories::upsert_directories(&mut tx, &known).await?;
            }
            directories::delete_directories(&mut tx, &removed).await?;
            tx.commit().await?;
            Ok::<_, HoardError>(())
        };
        if let Err(err) = update.await {
            warn!(target: "files::move", error = %err, "could not update directory rows after move");
        }
        removed
    }
}
