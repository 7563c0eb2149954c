use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::BIND_CHUNK;
use crate::error::Result;

/// Id of the tag named `name`, creating it if needed.
pub async fn ensure_tag(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    sqlx::query("INSERT OR IGNORE INTO tag (name) VALUES (?1)")
        .bind(name)
        .execute(&mut *conn)
        .await?;
    let id: i64 = sqlx::query_scalar("SELECT id FROM tag WHERE name = ?1")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

/// Attach `tag_id` to each group. Already-tagged groups are left alone.
pub async fn tag_groups(conn: &mut SqliteConnection, tag_id: i64, group_ids: &[i64]) -> Result<u64> {
    let mut tagged = 0;
    for chunk in group_ids.chunks(BIND_CHUNK / 2) {
        let mut qb =
            QueryBuilder::<Sqlite>::new("INSERT OR IGNORE INTO tag_file (tag_id, file_group_id) ");
        qb.push_values(chunk, |mut row, id| {
            row.push_bind(tag_id).push_bind(*id);
        });
        tagged += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(tagged)
}

/// Number of tag links held by any of `group_ids`.
pub async fn count_links(conn: &mut SqliteConnection, group_ids: &[i64]) -> Result<i64> {
    let mut total = 0;
    for chunk in group_ids.chunks(BIND_CHUNK) {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM tag_file WHERE file_group_id IN (");
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let count: i64 = qb.build_query_scalar().fetch_one(&mut *conn).await?;
        total += count;
    }
    Ok(total)
}

/// Move tag links from one group to another, dropping links the target
/// already has.
pub async fn reassign_links(conn: &mut SqliteConnection, from_id: i64, to_id: i64) -> Result<()> {
    sqlx::query("UPDATE OR IGNORE tag_file SET file_group_id = ?1 WHERE file_group_id = ?2")
        .bind(to_id)
        .bind(from_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn tag_names_for_group(conn: &mut SqliteConnection, group_id: i64) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT t.name FROM tag t JOIN tag_file tf ON tf.tag_id = t.id \
         WHERE tf.file_group_id = ?1 ORDER BY t.name",
    )
    .bind(group_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(names)
}

/// Remember URLs whose content was deleted so they are not fetched again.
pub async fn add_to_skip_list(conn: &mut SqliteConnection, urls: &[String]) -> Result<u64> {
    let mut added = 0;
    for chunk in urls.chunks(BIND_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new("INSERT OR IGNORE INTO download_skip_list (url) ");
        qb.push_values(chunk, |mut row, url| {
            row.push_bind(url.clone());
        });
        added += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(added)
}

pub async fn is_skip_listed(conn: &mut SqliteConnection, url: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM download_skip_list WHERE url = ?1")
        .bind(url)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}
