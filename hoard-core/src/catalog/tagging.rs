use std::collections::BTreeSet;
use std::path::PathBuf;

use hoard_model::FileGroup;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::database::{file_groups, tags};
use crate::error::{HoardError, Result};
use crate::stem::{GroupKey, group_key};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSummary {
    pub tag_id: i64,
    /// Groups found under the requested paths.
    pub groups: usize,
    /// Links that did not exist before.
    pub newly_tagged: u64,
}

/// Cataloged groups under `paths`. Directories contribute every group
/// beneath them; files contribute the group sharing their stem.
pub async fn groups_for_paths(
    conn: &mut SqliteConnection,
    paths: &[PathBuf],
) -> Result<Vec<FileGroup>> {
    let mut dirs = Vec::new();
    let mut keys: BTreeSet<GroupKey> = BTreeSet::new();
    for path in paths {
        let is_dir = tokio::fs::metadata(path)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false);
        if is_dir {
            dirs.push(path.clone());
        } else if let Some(key) = group_key(path) {
            keys.insert(key);
        }
    }

    let mut groups = if dirs.is_empty() {
        Vec::new()
    } else {
        file_groups::fetch_under_any(conn, &dirs).await?
    };

    if !keys.is_empty() {
        let parents: Vec<PathBuf> = keys
            .iter()
            .map(|(dir, _)| dir.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        groups.extend(
            file_groups::fetch_in_directories(conn, &parents)
                .await?
                .into_iter()
                .filter(|group| group_key(&group.primary_path).is_some_and(|key| keys.contains(&key))),
        );
    }

    groups.sort_by_key(|group| group.id);
    groups.dedup_by_key(|group| group.id);
    Ok(groups)
}

/// Attach `tag_name` to every group under `paths`, creating the tag.
pub async fn tag_paths(pool: &SqlitePool, tag_name: &str, paths: &[PathBuf]) -> Result<TagSummary> {
    let tag_name = tag_name.trim();
    if tag_name.is_empty() {
        return Err(HoardError::InvalidTask("tag name is empty".into()));
    }

    let mut tx = pool.begin().await?;
    let groups = groups_for_paths(&mut tx, paths).await?;
    let ids: Vec<i64> = groups.iter().map(|group| group.id).collect();
    let tag_id = tags::ensure_tag(&mut tx, tag_name).await?;
    let newly_tagged = tags::tag_groups(&mut tx, tag_id, &ids).await?;
    tx.commit().await?;

    info!(
        target: "catalog::tag",
        tag = tag_name,
        groups = ids.len(),
        newly_tagged,
        "tagged file groups"
    );
    Ok(TagSummary {
        tag_id,
        groups: ids.len(),
        newly_tagged,
    })
}
