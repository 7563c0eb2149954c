use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::database::BIND_CHUNK;
use crate::error::Result;
use crate::mimetype::{MimeCategory, category};

/// Domain record kinds a file group can be claimed as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DomainModel {
    Video,
    Ebook,
    Archive,
    Zim,
}

impl DomainModel {
    pub const ALL: [DomainModel; 4] = [
        DomainModel::Video,
        DomainModel::Ebook,
        DomainModel::Archive,
        DomainModel::Zim,
    ];

    /// Value stored in `file_group.model`.
    pub fn name(&self) -> &'static str {
        match self {
            DomainModel::Video => "video",
            DomainModel::Ebook => "ebook",
            DomainModel::Archive => "archive",
            DomainModel::Zim => "zim",
        }
    }

    pub fn table(&self) -> &'static str {
        self.name()
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|model| model.name() == name)
    }

    /// Whether a group whose primary has `mimetype` can carry this model.
    pub fn accepts(&self, mimetype: &str) -> bool {
        let expected = match self {
            DomainModel::Video => MimeCategory::Video,
            DomainModel::Ebook => MimeCategory::Ebook,
            DomainModel::Archive => MimeCategory::HtmlArchive,
            DomainModel::Zim => MimeCategory::Zim,
        };
        category(mimetype) == expected
    }
}

/// Remove the domain row of `model` for one group and reset its model state.
pub async fn detach(conn: &mut SqliteConnection, model: DomainModel, group_id: i64) -> Result<()> {
    let sql = format!("DELETE FROM {} WHERE file_group_id = ?1", model.table());
    sqlx::query(&sql).bind(group_id).execute(&mut *conn).await?;
    sqlx::query(
        "UPDATE file_group SET model = NULL, indexed = 0, deep_indexed = 0 WHERE id = ?1",
    )
    .bind(group_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Remove every domain row that references one of `group_ids`.
pub async fn delete_rows(conn: &mut SqliteConnection, group_ids: &[i64]) -> Result<u64> {
    let mut deleted = 0;
    for model in DomainModel::ALL {
        for chunk in group_ids.chunks(BIND_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "DELETE FROM {} WHERE file_group_id IN (",
                model.table()
            ));
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            deleted += qb.build().execute(&mut *conn).await?.rows_affected();
        }
    }
    Ok(deleted)
}
