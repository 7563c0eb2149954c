use std::collections::BTreeMap;

use async_trait::async_trait;
use hoard_model::FileGroup;
use sqlx::SqliteConnection;
use tracing::debug;

use super::{IndexText, Indexer, Modeler, write_index};
use crate::catalog::DomainModel;
use crate::database::file_groups;
use crate::error::Result;
use crate::stem::stem_of;

/// Titles a group after its stem and indexes its member names.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultIndexer;

impl Indexer for DefaultIndexer {
    fn index(&self, group: &FileGroup) -> IndexText {
        let title = group
            .title
            .clone()
            .or_else(|| stem_of(&group.primary_path).map(str::to_string));
        let names: Vec<&str> = group.files.iter().map(|file| file.path.as_str()).collect();

        IndexText {
            a: title,
            b: None,
            c: None,
            d: (!names.is_empty()).then(|| names.join(" ")),
        }
    }
}

/// Claims groups whose primary mimetype fits `model` and gives each a row in
/// the model's table. The row is complete once written, so claimed groups
/// come out deep-indexed.
#[derive(Clone, Copy, Debug)]
pub struct DomainModeler {
    model: DomainModel,
}

impl DomainModeler {
    pub fn new(model: DomainModel) -> Self {
        Self { model }
    }

    pub fn video() -> Self {
        Self::new(DomainModel::Video)
    }
}

#[async_trait]
impl Modeler for DomainModeler {
    fn name(&self) -> &'static str {
        self.model.name()
    }

    async fn model(
        &self,
        pending: &mut BTreeMap<i64, FileGroup>,
        conn: &mut SqliteConnection,
    ) -> Result<()> {
        let claimed: Vec<i64> = pending
            .values()
            .filter(|group| {
                group
                    .mimetype
                    .as_deref()
                    .is_some_and(|mimetype| self.model.accepts(mimetype))
            })
            .map(|group| group.id)
            .collect();

        let insert = format!(
            "INSERT INTO {} (file_group_id) VALUES (?1) ON CONFLICT (file_group_id) DO NOTHING",
            self.model.table()
        );
        for id in claimed {
            let Some(group) = pending.remove(&id) else {
                continue;
            };
            sqlx::query(&insert).bind(id).execute(&mut *conn).await?;
            let text = DefaultIndexer.index(&group);
            write_index(conn, id, Some(self.model.name()), &text).await?;
            file_groups::mark_deep_indexed(conn, id).await?;
            debug!(target: "files::pipeline", id, model = self.model.name(), "modeled file group");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoard_model::FileGroupFile;

    #[test]
    fn default_indexer_uses_stem_and_member_names() {
        let group = FileGroup {
            id: 7,
            primary_path: "/m/v/clip.mp4".into(),
            directory: "/m/v".into(),
            files: vec![
                FileGroupFile::new("clip.mp4", "video/mp4"),
                FileGroupFile::new("clip.en.vtt", "text/vtt"),
            ],
            mimetype: Some("video/mp4".into()),
            model: None,
            size: 0,
            modification_datetime: None,
            indexed: false,
            deep_indexed: false,
            idempotency: None,
            url: None,
            title: None,
        };

        let text = DefaultIndexer.index(&group);
        assert_eq!(text.a.as_deref(), Some("clip"));
        assert_eq!(text.d.as_deref(), Some("clip.mp4 clip.en.vtt"));
    }
}
