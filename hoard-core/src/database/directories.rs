use std::path::{Path, PathBuf};

use hoard_model::Directory;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::BIND_CHUNK;
use crate::error::Result;
use crate::paths::{like_descendants, path_to_db};

/// Record `dirs`, leaving existing rows untouched. Paths without a name
/// (the filesystem root) are skipped.
pub async fn upsert_directories(conn: &mut SqliteConnection, dirs: &[PathBuf]) -> Result<u64> {
    let rows: Vec<Directory> = dirs
        .iter()
        .filter_map(|dir| Directory::from_path(dir).ok())
        .collect();

    let mut inserted = 0;
    for chunk in rows.chunks(BIND_CHUNK / 2) {
        let mut qb = QueryBuilder::<Sqlite>::new("INSERT OR IGNORE INTO directory (path, name) ");
        qb.push_values(chunk, |mut row, dir| {
            row.push_bind(path_to_db(&dir.path)).push_bind(dir.name.clone());
        });
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

/// Known directories at or beneath `root`.
pub async fn fetch_under(conn: &mut SqliteConnection, root: &Path) -> Result<Vec<PathBuf>> {
    let paths: Vec<String> = sqlx::query_scalar(
        "SELECT path FROM directory WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\' ORDER BY path",
    )
    .bind(path_to_db(root))
    .bind(like_descendants(root))
    .fetch_all(&mut *conn)
    .await?;
    Ok(paths.into_iter().map(PathBuf::from).collect())
}

pub async fn delete_directories(conn: &mut SqliteConnection, dirs: &[PathBuf]) -> Result<u64> {
    let mut deleted = 0;
    for chunk in dirs.chunks(BIND_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM directory WHERE path IN (");
        let mut separated = qb.separated(", ");
        for dir in chunk {
            separated.push_bind(path_to_db(dir));
        }
        separated.push_unseparated(")");
        deleted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(deleted)
}

/// Drop `root` and every directory row beneath it.
pub async fn delete_tree(conn: &mut SqliteConnection, root: &Path) -> Result<u64> {
    let result = sqlx::query("DELETE FROM directory WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'")
        .bind(path_to_db(root))
        .bind(like_descendants(root))
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM directory")
        .fetch_one(&mut *conn)
        .await?;
    Ok(total)
}
