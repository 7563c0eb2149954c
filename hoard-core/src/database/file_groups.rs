use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hoard_model::{FileGroup, FileGroupFile};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::BIND_CHUNK;
use crate::error::{HoardError, Result};
use crate::paths::{like_descendants, path_to_db};

const COLUMNS: &str = "id, primary_path, directory, files, mimetype, model, size, \
     modification_datetime, indexed, deep_indexed, idempotency, url, title";

// Database row type for file groups
#[derive(sqlx::FromRow)]
struct FileGroupRow {
    id: i64,
    primary_path: String,
    directory: String,
    files: String,
    mimetype: Option<String>,
    model: Option<String>,
    size: i64,
    modification_datetime: Option<DateTime<Utc>>,
    indexed: bool,
    deep_indexed: bool,
    idempotency: Option<String>,
    url: Option<String>,
    title: Option<String>,
}

impl TryFrom<FileGroupRow> for FileGroup {
    type Error = HoardError;

    fn try_from(row: FileGroupRow) -> Result<Self> {
        let files: Vec<FileGroupFile> = serde_json::from_str(&row.files).map_err(|err| {
            HoardError::Internal(format!(
                "file group {} has malformed file list: {err}",
                row.id
            ))
        })?;

        Ok(FileGroup {
            id: row.id,
            primary_path: PathBuf::from(row.primary_path),
            directory: PathBuf::from(row.directory),
            files,
            mimetype: row.mimetype,
            model: row.model,
            size: row.size,
            modification_datetime: row.modification_datetime,
            indexed: row.indexed,
            deep_indexed: row.deep_indexed,
            idempotency: row.idempotency,
            url: row.url,
            title: row.title,
        })
    }
}

fn into_groups(rows: Vec<FileGroupRow>) -> Result<Vec<FileGroup>> {
    rows.into_iter().map(FileGroup::try_from).collect()
}

/// Values written by an upsert keyed on `primary_path`.
#[derive(Clone, Debug, PartialEq)]
pub struct FileGroupUpsert {
    pub primary_path: PathBuf,
    pub directory: PathBuf,
    pub files: Vec<FileGroupFile>,
    pub mimetype: String,
    pub size: i64,
    pub modification_datetime: Option<DateTime<Utc>>,
    pub idempotency: String,
}

/// Identity and model state of a row after an upsert.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct UpsertedGroup {
    pub id: i64,
    pub model: Option<String>,
    pub mimetype: Option<String>,
}

/// Groups whose directory is `dir` or anywhere beneath it.
pub async fn fetch_under(conn: &mut SqliteConnection, dir: &Path) -> Result<Vec<FileGroup>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM file_group \
         WHERE directory = ?1 OR directory LIKE ?2 ESCAPE '\\' ORDER BY id"
    );
    let rows: Vec<FileGroupRow> = sqlx::query_as(&sql)
        .bind(path_to_db(dir))
        .bind(like_descendants(dir))
        .fetch_all(&mut *conn)
        .await?;
    into_groups(rows)
}

/// Groups at or beneath any of `dirs`, in one round trip per chunk.
pub async fn fetch_under_any(
    conn: &mut SqliteConnection,
    dirs: &[PathBuf],
) -> Result<Vec<FileGroup>> {
    let mut groups = Vec::new();
    for chunk in dirs.chunks(BIND_CHUNK / 2) {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {COLUMNS} FROM file_group WHERE "));
        for (i, dir) in chunk.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push("directory = ")
                .push_bind(path_to_db(dir))
                .push(" OR directory LIKE ")
                .push_bind(like_descendants(dir))
                .push(" ESCAPE '\\'");
        }
        qb.push(" ORDER BY id");
        let rows: Vec<FileGroupRow> = qb.build_query_as().fetch_all(&mut *conn).await?;
        groups.extend(into_groups(rows)?);
    }
    groups.sort_by_key(|group| group.id);
    groups.dedup_by_key(|group| group.id);
    Ok(groups)
}

/// Groups whose directory is exactly one of `dirs`.
pub async fn fetch_in_directories(
    conn: &mut SqliteConnection,
    dirs: &[PathBuf],
) -> Result<Vec<FileGroup>> {
    let mut groups = Vec::new();
    for chunk in dirs.chunks(BIND_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {COLUMNS} FROM file_group WHERE directory IN ("
        ));
        let mut separated = qb.separated(", ");
        for dir in chunk {
            separated.push_bind(path_to_db(dir));
        }
        separated.push_unseparated(") ORDER BY id");
        let rows: Vec<FileGroupRow> = qb.build_query_as().fetch_all(&mut *conn).await?;
        groups.extend(into_groups(rows)?);
    }
    Ok(groups)
}

pub async fn fetch_by_ids(conn: &mut SqliteConnection, ids: &[i64]) -> Result<Vec<FileGroup>> {
    let mut groups = Vec::new();
    for chunk in ids.chunks(BIND_CHUNK) {
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {COLUMNS} FROM file_group WHERE id IN ("));
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");
        let rows: Vec<FileGroupRow> = qb.build_query_as().fetch_all(&mut *conn).await?;
        groups.extend(into_groups(rows)?);
    }
    Ok(groups)
}

pub async fn fetch_by_primary_path(
    conn: &mut SqliteConnection,
    path: &Path,
) -> Result<Option<FileGroup>> {
    let sql = format!("SELECT {COLUMNS} FROM file_group WHERE primary_path = ?1");
    let row: Option<FileGroupRow> = sqlx::query_as(&sql)
        .bind(path_to_db(path))
        .fetch_optional(&mut *conn)
        .await?;
    row.map(FileGroup::try_from).transpose()
}

/// Id of the group whose primary file is `path`, if any.
pub async fn owner_of_primary_path(
    conn: &mut SqliteConnection,
    path: &Path,
) -> Result<Option<i64>> {
    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM file_group WHERE primary_path = ?1")
        .bind(path_to_db(path))
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

/// Next page of groups awaiting modeling and indexing.
pub async fn fetch_unindexed_after(
    conn: &mut SqliteConnection,
    after_id: i64,
    limit: usize,
) -> Result<Vec<FileGroup>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM file_group WHERE indexed = 0 AND id > ?1 ORDER BY id LIMIT ?2"
    );
    let rows: Vec<FileGroupRow> = sqlx::query_as(&sql)
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;
    into_groups(rows)
}

/// Insert or update the group owning `primary_path`.
///
/// Index state is cleared whenever the member list, mimetype, or content
/// timestamp changes so the pipeline revisits the group.
pub async fn upsert(conn: &mut SqliteConnection, group: &FileGroupUpsert) -> Result<UpsertedGroup> {
    let files = serde_json::to_string(&group.files)?;
    let upserted: UpsertedGroup = sqlx::query_as(
        r#"
        INSERT INTO file_group
            (primary_path, directory, files, mimetype, size, modification_datetime, idempotency)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT (primary_path) DO UPDATE SET
            directory = excluded.directory,
            indexed = CASE
                WHEN file_group.files = excluded.files
                 AND file_group.mimetype IS excluded.mimetype
                 AND file_group.modification_datetime IS excluded.modification_datetime
                THEN file_group.indexed ELSE 0 END,
            deep_indexed = CASE
                WHEN file_group.files = excluded.files
                 AND file_group.mimetype IS excluded.mimetype
                 AND file_group.modification_datetime IS excluded.modification_datetime
                THEN file_group.deep_indexed ELSE 0 END,
            files = excluded.files,
            mimetype = excluded.mimetype,
            size = excluded.size,
            modification_datetime = excluded.modification_datetime,
            idempotency = excluded.idempotency
        RETURNING id, model, mimetype
        "#,
    )
    .bind(path_to_db(&group.primary_path))
    .bind(path_to_db(&group.directory))
    .bind(files)
    .bind(&group.mimetype)
    .bind(group.size)
    .bind(group.modification_datetime)
    .bind(&group.idempotency)
    .fetch_one(&mut *conn)
    .await?;
    Ok(upserted)
}

pub async fn set_primary_path(
    conn: &mut SqliteConnection,
    id: i64,
    primary_path: &Path,
) -> Result<()> {
    sqlx::query("UPDATE file_group SET primary_path = ?1 WHERE id = ?2")
        .bind(path_to_db(primary_path))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Replace the member list, e.g. after a rename. Index state is cleared so
/// the pipeline picks up the new names.
pub async fn set_files(conn: &mut SqliteConnection, id: i64, files: &[FileGroupFile]) -> Result<()> {
    sqlx::query("UPDATE file_group SET files = ?1, indexed = 0, deep_indexed = 0 WHERE id = ?2")
        .bind(serde_json::to_string(files)?)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Record that a modeler extracted everything it needs from the group's
/// content, not just its names.
pub async fn mark_deep_indexed(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("UPDATE file_group SET deep_indexed = 1 WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// New location of one group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrimaryRewrite {
    pub id: i64,
    pub primary_path: PathBuf,
    pub directory: PathBuf,
}

/// Rewrite primary paths and directories for many groups with one
/// `CASE` update per chunk.
pub async fn rewrite_locations(
    conn: &mut SqliteConnection,
    rewrites: &[PrimaryRewrite],
) -> Result<u64> {
    let mut affected = 0;
    for chunk in rewrites.chunks(BIND_CHUNK / 5) {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE file_group SET primary_path = CASE id");
        for rewrite in chunk {
            qb.push(" WHEN ")
                .push_bind(rewrite.id)
                .push(" THEN ")
                .push_bind(path_to_db(&rewrite.primary_path));
        }
        qb.push(" END, directory = CASE id");
        for rewrite in chunk {
            qb.push(" WHEN ")
                .push_bind(rewrite.id)
                .push(" THEN ")
                .push_bind(path_to_db(&rewrite.directory));
        }
        qb.push(" END WHERE id IN (");
        let mut separated = qb.separated(", ");
        for rewrite in chunk {
            separated.push_bind(rewrite.id);
        }
        separated.push_unseparated(")");
        affected += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(affected)
}

pub async fn delete_by_ids(conn: &mut SqliteConnection, ids: &[i64]) -> Result<u64> {
    let mut deleted = 0;
    for chunk in ids.chunks(BIND_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM file_group WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        deleted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(deleted)
}

/// Mark groups a pass saw unchanged with that pass's idempotency token.
pub async fn stamp_idempotency(
    conn: &mut SqliteConnection,
    ids: &[i64],
    idempotency: &str,
) -> Result<u64> {
    let mut stamped = 0;
    for chunk in ids.chunks(BIND_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE file_group SET idempotency = ");
        qb.push_bind(idempotency.to_string());
        qb.push(" WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        stamped += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(stamped)
}

/// Ids of groups whose primary path is one of `paths`.
pub async fn ids_at_primary_paths(
    conn: &mut SqliteConnection,
    paths: &[PathBuf],
) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    for chunk in paths.chunks(BIND_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM file_group WHERE primary_path IN (");
        let mut separated = qb.separated(", ");
        for path in chunk {
            separated.push_bind(path_to_db(path));
        }
        separated.push_unseparated(")");
        let found: Vec<i64> = qb.build_query_scalar().fetch_all(&mut *conn).await?;
        ids.extend(found);
    }
    Ok(ids)
}

pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_group")
        .fetch_one(&mut *conn)
        .await?;
    Ok(total)
}

/// Groups still waiting for the post-processing pipeline.
pub async fn count_unindexed(conn: &mut SqliteConnection) -> Result<i64> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_group WHERE indexed = 0")
        .fetch_one(&mut *conn)
        .await?;
    Ok(total)
}
