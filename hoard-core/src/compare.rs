//! Diffing the filesystem against the catalog.
//!
//! Filesystem entries are staged in a connection-local temporary table in
//! committed batches, aggregated per `(directory, stem)` in a single query,
//! and matched against the catalog's groups under the same roots.

use std::collections::{BTreeSet, HashMap, hash_map::Entry};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use futures::StreamExt;
use hoard_model::FileGroup;
use sqlx::{Connection, QueryBuilder, Sqlite, SqliteConnection};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, non_overlapping_directories};
use crate::database::file_groups;
use crate::error::{HoardError, Result};
use crate::paths::path_to_db;
use crate::scanner::FileScanner;
use crate::stem::{GroupKey, group_key, split_stem_and_suffix};

/// Difference between the catalog and the disk for one `(directory, stem)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileGroupDiff {
    pub directory: PathBuf,
    pub stem: String,
    /// Member names the catalog records.
    pub db_files: BTreeSet<String>,
    /// Member names present on disk.
    pub fs_files: BTreeSet<String>,
    pub file_group_id: Option<i64>,
    /// Primary path the catalog currently records.
    pub db_primary: Option<PathBuf>,
    /// Members are unchanged but their content is newer than the catalog.
    pub content_changed: bool,
    /// Set on a duplicate group that is dropped in favor of another group
    /// with the same key.
    pub superseded_by: Option<i64>,
}

impl FileGroupDiff {
    pub fn is_new(&self) -> bool {
        self.file_group_id.is_none() && !self.fs_files.is_empty()
    }

    pub fn is_deleted(&self) -> bool {
        self.file_group_id.is_some() && self.fs_files.is_empty()
    }

    pub fn needs_update(&self) -> bool {
        self.file_group_id.is_some()
            && !self.fs_files.is_empty()
            && (self.db_files != self.fs_files || self.content_changed)
    }

    pub fn is_unchanged(&self) -> bool {
        self.file_group_id.is_some()
            && !self.fs_files.is_empty()
            && self.db_files == self.fs_files
            && !self.content_changed
    }

    /// Absolute paths of the members found on disk.
    pub fn fs_paths(&self) -> Vec<PathBuf> {
        self.fs_files
            .iter()
            .map(|name| self.directory.join(name))
            .collect()
    }
}

/// A comparison result partitioned by outcome.
#[derive(Clone, Debug, Default)]
pub struct FileGroupDiffs {
    pub unchanged: Vec<FileGroupDiff>,
    pub new: Vec<FileGroupDiff>,
    pub deleted: Vec<FileGroupDiff>,
    pub modified: Vec<FileGroupDiff>,
    pub files_seen: u64,
}

impl FileGroupDiffs {
    pub fn push(&mut self, diff: FileGroupDiff) {
        if diff.is_new() {
            self.new.push(diff);
        } else if diff.is_deleted() {
            self.deleted.push(diff);
        } else if diff.needs_update() {
            self.modified.push(diff);
        } else if diff.is_unchanged() {
            self.unchanged.push(diff);
        }
    }

    /// Number of diffs that require a catalog write.
    pub fn changed(&self) -> usize {
        self.new.len() + self.deleted.len() + self.modified.len()
    }

    pub fn is_clean(&self) -> bool {
        self.changed() == 0
    }

    fn sort(&mut self) {
        for list in [
            &mut self.unchanged,
            &mut self.new,
            &mut self.deleted,
            &mut self.modified,
        ] {
            list.sort_by(|a, b| (&a.directory, &a.stem).cmp(&(&b.directory, &b.stem)));
        }
    }
}

/// Names and newest mtime found on disk for one group key.
#[derive(Clone, Debug, Default)]
struct FsGroup {
    names: BTreeSet<String>,
    newest_mtime: f64,
}

struct ScanRow {
    directory: String,
    name: String,
    stem: String,
    mtime: f64,
}

impl ScanRow {
    /// Stat `path`. Files that vanished since listing or cannot be read are
    /// skipped and picked up again by a later refresh.
    async fn stat(path: &Path) -> Option<Self> {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name().and_then(|n| n.to_str()))
        else {
            debug!(target: "scan::compare", path = %path.display(), "skipping path without a UTF-8 name");
            return None;
        };

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(target: "scan::compare", path = %path.display(), error = %err, "cannot stat file; skipping");
                return None;
            }
        };

        Some(Self {
            directory: path_to_db(parent),
            name: name.to_string(),
            stem: split_stem_and_suffix(name).0.to_string(),
            mtime: mtime_seconds(&metadata),
        })
    }
}

pub(crate) fn mtime_seconds(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

/// Produces [`FileGroupDiffs`] for directory roots or individual files.
#[derive(Debug)]
pub struct Comparator<'a> {
    scanner: &'a FileScanner,
    batch_size: usize,
    mtime_epsilon: Duration,
}

impl<'a> Comparator<'a> {
    pub fn new(scanner: &'a FileScanner, config: &EngineConfig) -> Self {
        Self {
            scanner,
            batch_size: config.scan_batch_size.max(1),
            mtime_epsilon: config.mtime_epsilon(),
        }
    }

    /// Diff every group at or beneath `roots`.
    ///
    /// `conn` must stay the same connection for the whole call; the staging
    /// table is connection-local. `on_progress` receives the running count of
    /// staged files after each committed batch.
    pub async fn compare<F>(
        &self,
        conn: &mut SqliteConnection,
        roots: &[PathBuf],
        cancel: &CancellationToken,
        on_progress: F,
    ) -> Result<FileGroupDiffs>
    where
        F: FnMut(u64) + Send,
    {
        let roots = non_overlapping_directories(roots.to_vec());

        create_scan_table(conn).await?;
        let result = self.compare_staged(conn, &roots, cancel, on_progress).await;
        if let Err(err) = drop_scan_table(conn).await {
            warn!(target: "scan::compare", error = %err, "failed to drop staging table");
        }
        result
    }

    async fn compare_staged<F>(
        &self,
        conn: &mut SqliteConnection,
        roots: &[PathBuf],
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<FileGroupDiffs>
    where
        F: FnMut(u64) + Send,
    {
        let stream = self.scanner.stream_files(roots.to_vec());
        futures::pin_mut!(stream);

        let mut batch: Vec<ScanRow> = Vec::with_capacity(self.batch_size);
        let mut staged: u64 = 0;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(HoardError::Cancelled("comparison".into()));
                }
                next = stream.next() => next,
            };
            let Some(path) = next else { break };
            let Some(row) = ScanRow::stat(&path?).await else {
                continue;
            };
            batch.push(row);

            if batch.len() >= self.batch_size {
                staged += insert_scan_batch(conn, &batch).await?;
                batch.clear();
                on_progress(staged);
                tokio::task::yield_now().await;
            }
        }
        if !batch.is_empty() {
            staged += insert_scan_batch(conn, &batch).await?;
            on_progress(staged);
        }

        let fs_groups = aggregate_scan_table(conn).await?;

        let mut db_groups = Vec::new();
        for root in roots {
            db_groups.extend(file_groups::fetch_under(conn, root).await?);
        }

        let mut diffs = classify(fs_groups, db_groups, self.mtime_epsilon);
        diffs.files_seen = staged;

        info!(
            target: "scan::compare",
            roots = roots.len(),
            files = staged,
            new = diffs.new.len(),
            modified = diffs.modified.len(),
            deleted = diffs.deleted.len(),
            unchanged = diffs.unchanged.len(),
            "comparison complete"
        );
        Ok(diffs)
    }

    /// Diff only the groups that `paths` belong to.
    ///
    /// Sibling files sharing a stem are picked up from each parent directory
    /// without walking any subtree.
    pub async fn compare_paths(
        &self,
        conn: &mut SqliteConnection,
        paths: &[PathBuf],
    ) -> Result<FileGroupDiffs> {
        let keys: BTreeSet<GroupKey> = paths.iter().filter_map(|path| group_key(path)).collect();
        let directories: Vec<PathBuf> = keys
            .iter()
            .map(|(dir, _)| dir.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut fs_groups: HashMap<GroupKey, FsGroup> = HashMap::new();
        let mut files_seen = 0;
        for dir in &directories {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let key = (dir.clone(), split_stem_and_suffix(name).0.to_string());
                if !keys.contains(&key) || self.scanner.is_ignored(&path) {
                    continue;
                }
                let metadata = match entry.metadata().await {
                    Ok(metadata) if metadata.is_file() => metadata,
                    _ => continue,
                };
                let found = fs_groups.entry(key).or_default();
                found.names.insert(name.to_string());
                found.newest_mtime = found.newest_mtime.max(mtime_seconds(&metadata));
                files_seen += 1;
            }
        }

        let db_groups: Vec<FileGroup> = file_groups::fetch_in_directories(conn, &directories)
            .await?
            .into_iter()
            .filter(|group| group_key(&group.primary_path).is_some_and(|key| keys.contains(&key)))
            .collect();

        let mut diffs = classify(fs_groups, db_groups, self.mtime_epsilon);
        diffs.files_seen = files_seen;
        Ok(diffs)
    }
}

async fn create_scan_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "CREATE TEMP TABLE IF NOT EXISTS fs_scan (\
            directory TEXT NOT NULL, \
            name TEXT NOT NULL, \
            stem TEXT NOT NULL, \
            mtime REAL NOT NULL, \
            PRIMARY KEY (directory, name))",
    )
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM temp.fs_scan")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn drop_scan_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("DROP TABLE IF EXISTS temp.fs_scan")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn insert_scan_batch(conn: &mut SqliteConnection, rows: &[ScanRow]) -> Result<u64> {
    let mut tx = conn.begin().await?;
    let mut inserted = 0;
    // Four binds per row.
    for chunk in rows.chunks(200) {
        let mut qb =
            QueryBuilder::<Sqlite>::new("INSERT OR REPLACE INTO temp.fs_scan (directory, name, stem, mtime) ");
        qb.push_values(chunk, |mut row, entry| {
            row.push_bind(entry.directory.clone())
                .push_bind(entry.name.clone())
                .push_bind(entry.stem.clone())
                .push_bind(entry.mtime);
        });
        inserted += qb.build().execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

async fn aggregate_scan_table(conn: &mut SqliteConnection) -> Result<HashMap<GroupKey, FsGroup>> {
    let rows: Vec<(String, String, String, f64)> = sqlx::query_as(
        "SELECT directory, stem, json_group_array(name), MAX(mtime) \
         FROM temp.fs_scan GROUP BY directory, stem",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut groups = HashMap::with_capacity(rows.len());
    for (directory, stem, names, newest_mtime) in rows {
        let names: BTreeSet<String> = serde_json::from_str(&names)?;
        groups.insert(
            (PathBuf::from(directory), stem),
            FsGroup {
                names,
                newest_mtime,
            },
        );
    }
    Ok(groups)
}

fn primary_on_disk(group: &FileGroup, found: Option<&FsGroup>) -> bool {
    match (group.primary_name(), found) {
        (Some(name), Some(found)) => found.names.contains(name),
        _ => false,
    }
}

fn content_is_newer(group: &FileGroup, found: &FsGroup, epsilon: Duration) -> bool {
    let Some(recorded) = group.modification_datetime else {
        return true;
    };
    let recorded = recorded.timestamp_millis() as f64 / 1_000.0;
    (found.newest_mtime - recorded).abs() > epsilon.as_secs_f64()
}

fn deleted_diff(key: GroupKey, group: &FileGroup, superseded_by: Option<i64>) -> FileGroupDiff {
    FileGroupDiff {
        directory: key.0,
        stem: key.1,
        db_files: group.file_names(),
        fs_files: BTreeSet::new(),
        file_group_id: Some(group.id),
        db_primary: Some(group.primary_path.clone()),
        content_changed: false,
        superseded_by,
    }
}

/// Match on-disk groups with cataloged groups by key.
fn classify(
    mut fs_groups: HashMap<GroupKey, FsGroup>,
    db_groups: Vec<FileGroup>,
    epsilon: Duration,
) -> FileGroupDiffs {
    let mut diffs = FileGroupDiffs::default();
    let mut keyed: HashMap<GroupKey, FileGroup> = HashMap::new();

    for group in db_groups {
        let Some(key) = group_key(&group.primary_path) else {
            warn!(target: "scan::compare", id = group.id, "file group has no usable primary path; deleting");
            diffs.push(FileGroupDiff {
                file_group_id: Some(group.id),
                db_primary: Some(group.primary_path.clone()),
                ..Default::default()
            });
            continue;
        };

        // Groups with no recorded members are settled immediately.
        if group.files.is_empty() {
            let fs_files = fs_groups
                .remove(&key)
                .map(|found| found.names)
                .unwrap_or_default();
            diffs.push(FileGroupDiff {
                directory: key.0,
                stem: key.1,
                db_files: BTreeSet::new(),
                fs_files,
                file_group_id: Some(group.id),
                db_primary: Some(group.primary_path.clone()),
                content_changed: false,
                superseded_by: None,
            });
            continue;
        }

        match keyed.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(group);
            }
            Entry::Occupied(mut slot) => {
                let found = fs_groups.get(slot.key());
                let challenger_wins =
                    primary_on_disk(&group, found) && !primary_on_disk(slot.get(), found);
                let loser = if challenger_wins {
                    slot.insert(group)
                } else {
                    group
                };
                let survivor = slot.get().id;
                warn!(
                    target: "scan::compare",
                    survivor,
                    duplicate = loser.id,
                    primary = %loser.primary_path.display(),
                    "duplicate file groups share a key; dropping duplicate"
                );
                diffs.push(deleted_diff(slot.key().clone(), &loser, Some(survivor)));
            }
        }
    }

    for (key, group) in keyed {
        let found = fs_groups.remove(&key);
        let mut diff = FileGroupDiff {
            directory: key.0,
            stem: key.1,
            db_files: group.file_names(),
            fs_files: BTreeSet::new(),
            file_group_id: Some(group.id),
            db_primary: Some(group.primary_path.clone()),
            content_changed: false,
            superseded_by: None,
        };
        if let Some(found) = found {
            diff.fs_files = found.names.clone();
            if diff.is_unchanged() && content_is_newer(&group, &found, epsilon) {
                diff.content_changed = true;
            }
        }
        diffs.push(diff);
    }

    for ((directory, stem), found) in fs_groups {
        diffs.push(FileGroupDiff {
            directory,
            stem,
            fs_files: found.names,
            ..Default::default()
        });
    }

    diffs.sort();
    diffs
}
