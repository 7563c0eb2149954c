//! Applying comparison results to the catalog.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use hoard_model::FileGroupFile;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::domain::{self, DomainModel};
use super::primary::select_primary;
use crate::compare::{FileGroupDiff, FileGroupDiffs, mtime_seconds};
use crate::config::EngineConfig;
use crate::database::{file_groups, tags};
use crate::database::file_groups::FileGroupUpsert;
use crate::error::{HoardError, Result};
use crate::mimetype::detect_mimetype;

/// What one mutation pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MutationSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Groups whose primary pointer was moved ahead of the upsert.
    pub primaries_moved: usize,
    /// Groups whose domain record no longer fit and was dropped.
    pub models_cleared: usize,
    pub skip_listed: usize,
    /// Unchanged groups re-stamped with this pass's idempotency token.
    pub stamped: usize,
    /// A deleted group carried tags; tag configuration needs re-saving.
    pub tags_changed: bool,
    /// Ids written by the upsert phase.
    pub upserted_ids: Vec<i64>,
}

/// One group re-derived from the files actually on disk.
#[derive(Debug)]
struct GroupSnapshot {
    existing_id: Option<i64>,
    db_primary: Option<PathBuf>,
    upsert: FileGroupUpsert,
}

/// Build the row for `diff` from its on-disk members. Members that vanished
/// since the comparison are dropped; `None` means none are left.
async fn snapshot(diff: &FileGroupDiff, idempotency: &str) -> Option<GroupSnapshot> {
    let mut files = Vec::with_capacity(diff.fs_files.len());
    let mut size: i64 = 0;
    let mut newest: Option<f64> = None;

    for name in &diff.fs_files {
        let path = diff.directory.join(name);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                warn!(target: "catalog::mutate", path = %path.display(), error = %err, "cannot stat member; leaving it out");
                continue;
            }
        };
        size = size.saturating_add(i64::try_from(metadata.len()).unwrap_or(i64::MAX));
        let mtime = mtime_seconds(&metadata);
        newest = Some(newest.map_or(mtime, |current: f64| current.max(mtime)));
        files.push(FileGroupFile::new(name.clone(), detect_mimetype(&path)));
    }

    let choice = select_primary(&files)?;
    if choice.ambiguous {
        warn!(
            target: "catalog::mutate",
            directory = %diff.directory.display(),
            stem = %diff.stem,
            chosen = %files[choice.index].path,
            "several files could be primary; using the first by name"
        );
    }

    let primary = &files[choice.index];
    let upsert = FileGroupUpsert {
        primary_path: diff.directory.join(&primary.path),
        directory: diff.directory.clone(),
        mimetype: primary.mimetype.clone(),
        files,
        size,
        modification_datetime: newest
            .and_then(|secs| DateTime::<Utc>::from_timestamp_millis((secs * 1_000.0) as i64)),
        idempotency: idempotency.to_string(),
    };

    Some(GroupSnapshot {
        existing_id: diff.file_group_id,
        db_primary: diff.db_primary.clone(),
        upsert,
    })
}

/// Writes [`FileGroupDiffs`] to the catalog in committed batches.
#[derive(Debug)]
pub struct CatalogMutator<'a> {
    pool: &'a SqlitePool,
    upsert_batch_size: usize,
    delete_batch_size: usize,
}

impl<'a> CatalogMutator<'a> {
    pub fn new(pool: &'a SqlitePool, config: &EngineConfig) -> Self {
        Self {
            pool,
            upsert_batch_size: config.upsert_batch_size.max(1),
            delete_batch_size: config.delete_batch_size.max(1),
        }
    }

    /// Apply `diffs`: re-point moved primaries, upsert new and modified
    /// groups, then delete vanished ones.
    ///
    /// Every batch commits on its own. Cancellation is honored between
    /// batches and leaves earlier batches in place.
    pub async fn apply(
        &self,
        diffs: &FileGroupDiffs,
        idempotency: &str,
        cancel: &CancellationToken,
    ) -> Result<MutationSummary> {
        let mut summary = MutationSummary::default();

        let mut snapshots = Vec::with_capacity(diffs.new.len() + diffs.modified.len());
        for diff in diffs.new.iter().chain(diffs.modified.iter()) {
            match snapshot(diff, idempotency).await {
                Some(snapshot) => snapshots.push(snapshot),
                None => debug!(
                    target: "catalog::mutate",
                    directory = %diff.directory.display(),
                    stem = %diff.stem,
                    "members vanished before upsert; leaving for the next refresh"
                ),
            }
        }

        // Duplicates go first so their primary paths are free for the
        // survivor to take over.
        let (superseded, vanished): (Vec<&FileGroupDiff>, Vec<&FileGroupDiff>) = diffs
            .deleted
            .iter()
            .filter(|diff| diff.file_group_id.is_some())
            .partition(|diff| diff.superseded_by.is_some());
        for batch in superseded.chunks(self.delete_batch_size) {
            self.delete_batch(batch, &mut summary).await?;
        }

        self.pre_update_primaries(&snapshots, &mut summary).await?;
        self.upsert_all(&snapshots, cancel, &mut summary).await?;

        let written: HashSet<i64> = summary.upserted_ids.iter().copied().collect();
        let doomed: Vec<&FileGroupDiff> = vanished
            .into_iter()
            .filter(|diff| diff.file_group_id.is_some_and(|id| !written.contains(&id)))
            .collect();
        for batch in doomed.chunks(self.delete_batch_size) {
            if cancel.is_cancelled() {
                return Err(HoardError::Cancelled("catalog delete".into()));
            }
            self.delete_batch(batch, &mut summary).await?;
        }

        let unchanged: Vec<i64> = diffs
            .unchanged
            .iter()
            .filter_map(|diff| diff.file_group_id)
            .collect();
        if !unchanged.is_empty() {
            let mut conn = self.pool.acquire().await?;
            summary.stamped =
                file_groups::stamp_idempotency(&mut conn, &unchanged, idempotency).await? as usize;
        }

        info!(
            target: "catalog::mutate",
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            primaries_moved = summary.primaries_moved,
            models_cleared = summary.models_cleared,
            stamped = summary.stamped,
            "catalog updated"
        );
        Ok(summary)
    }

    async fn pre_update_primaries(
        &self,
        snapshots: &[GroupSnapshot],
        summary: &mut MutationSummary,
    ) -> Result<()> {
        let moved: Vec<&GroupSnapshot> = snapshots
            .iter()
            .filter(|snap| {
                snap.existing_id.is_some()
                    && snap
                        .db_primary
                        .as_ref()
                        .is_some_and(|current| *current != snap.upsert.primary_path)
            })
            .collect();
        if moved.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for snap in moved {
            let Some(id) = snap.existing_id else { continue };
            let target = &snap.upsert.primary_path;
            match file_groups::owner_of_primary_path(&mut tx, target).await? {
                None => {
                    file_groups::set_primary_path(&mut tx, id, target).await?;
                    summary.primaries_moved += 1;
                }
                Some(owner) if owner == id => {}
                Some(owner) => {
                    warn!(
                        target: "catalog::mutate",
                        id,
                        owner,
                        primary = %target.display(),
                        "another file group already owns the new primary path"
                    );
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_all(
        &self,
        snapshots: &[GroupSnapshot],
        cancel: &CancellationToken,
        summary: &mut MutationSummary,
    ) -> Result<()> {
        for batch in snapshots.chunks(self.upsert_batch_size) {
            if cancel.is_cancelled() {
                return Err(HoardError::Cancelled("catalog upsert".into()));
            }

            let mut tx = self.pool.begin().await?;
            for snap in batch {
                let upserted = file_groups::upsert(&mut tx, &snap.upsert).await?;
                if snap.existing_id.is_some() {
                    summary.updated += 1;
                } else {
                    summary.inserted += 1;
                }

                if let Some(model) = upserted.model.as_deref().and_then(DomainModel::parse)
                    && !model.accepts(upserted.mimetype.as_deref().unwrap_or_default())
                {
                    debug!(
                        target: "catalog::mutate",
                        id = upserted.id,
                        model = model.name(),
                        mimetype = ?upserted.mimetype,
                        "domain model no longer fits primary file"
                    );
                    domain::detach(&mut tx, model, upserted.id).await?;
                    summary.models_cleared += 1;
                }
                summary.upserted_ids.push(upserted.id);
            }
            tx.commit().await?;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn delete_batch(
        &self,
        batch: &[&FileGroupDiff],
        summary: &mut MutationSummary,
    ) -> Result<()> {
        let ids: Vec<i64> = batch.iter().filter_map(|diff| diff.file_group_id).collect();
        let superseded: HashMap<i64, i64> = batch
            .iter()
            .filter_map(|diff| Some((diff.file_group_id?, diff.superseded_by?)))
            .collect();

        let mut tx = self.pool.begin().await?;
        let groups = file_groups::fetch_by_ids(&mut tx, &ids).await?;

        let mut urls = Vec::new();
        for group in &groups {
            match superseded.get(&group.id) {
                Some(&survivor) => {
                    // Duplicates hand their URL and tags to the surviving group.
                    if let Some(url) = &group.url {
                        sqlx::query("UPDATE file_group SET url = COALESCE(url, ?1) WHERE id = ?2")
                            .bind(url)
                            .bind(survivor)
                            .execute(&mut *tx)
                            .await?;
                    }
                    tags::reassign_links(&mut tx, group.id, survivor).await?;
                }
                None => urls.extend(group.url.clone()),
            }
        }

        summary.skip_listed += tags::add_to_skip_list(&mut tx, &urls).await? as usize;
        if tags::count_links(&mut tx, &ids).await? > 0 {
            summary.tags_changed = true;
        }
        domain::delete_rows(&mut tx, &ids).await?;
        summary.deleted += file_groups::delete_by_ids(&mut tx, &ids).await? as usize;
        tx.commit().await?;
        Ok(())
    }
}
