//! Post-processing of un-indexed file groups.
//!
//! Modelers run first, in registration order, and claim the groups they
//! understand by removing them from the pending map. Whatever is left is
//! handed to the indexer registered for its mimetype. Cleanup hooks run once
//! after every batch is done.

pub mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hoard_model::FileGroup;
use sqlx::{SqliteConnection, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::database::file_groups;
use crate::error::{HoardError, Result};

pub use builtin::{DefaultIndexer, DomainModeler};

/// Weighted search text, most significant first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexText {
    pub a: Option<String>,
    pub b: Option<String>,
    pub c: Option<String>,
    pub d: Option<String>,
}

/// Turns file groups into domain records.
///
/// Implementations remove every group they handled from `pending` and mark
/// it indexed. Per-group failures are logged and the group left in place;
/// an `Err` aborts the whole pipeline run.
#[async_trait]
pub trait Modeler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn model(
        &self,
        pending: &mut BTreeMap<i64, FileGroup>,
        conn: &mut SqliteConnection,
    ) -> Result<()>;
}

/// Extracts search text for a group no modeler claimed.
pub trait Indexer: Send + Sync {
    fn index(&self, group: &FileGroup) -> IndexText;
}

/// Runs after all batches are processed.
#[async_trait]
pub trait CleanupHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn cleanup(&self, pool: &SqlitePool) -> Result<()>;
}

/// Ordered modelers, mimetype-keyed indexers, and cleanup hooks.
pub struct HookRegistry {
    modelers: Vec<Arc<dyn Modeler>>,
    indexers: Vec<(String, Arc<dyn Indexer>)>,
    default_indexer: Arc<dyn Indexer>,
    cleanups: Vec<Arc<dyn CleanupHook>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field(
                "modelers",
                &self.modelers.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field(
                "indexers",
                &self.indexers.iter().map(|(pattern, _)| pattern).collect::<Vec<_>>(),
            )
            .field(
                "cleanups",
                &self.cleanups.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// No modelers; everything falls through to [`DefaultIndexer`].
    pub fn new() -> Self {
        Self {
            modelers: Vec::new(),
            indexers: Vec::new(),
            default_indexer: Arc::new(DefaultIndexer),
            cleanups: Vec::new(),
        }
    }

    /// Registry with the built-in video modeler.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_modeler(Arc::new(DomainModeler::video()));
        registry
    }

    pub fn register_modeler(&mut self, modeler: Arc<dyn Modeler>) -> &mut Self {
        self.modelers.push(modeler);
        self
    }

    /// `pattern` is an exact mimetype (`application/pdf`) or a prefix ending
    /// in `/` (`text/`).
    pub fn register_indexer(
        &mut self,
        pattern: impl Into<String>,
        indexer: Arc<dyn Indexer>,
    ) -> &mut Self {
        self.indexers.push((pattern.into(), indexer));
        self
    }

    pub fn set_default_indexer(&mut self, indexer: Arc<dyn Indexer>) -> &mut Self {
        self.default_indexer = indexer;
        self
    }

    pub fn register_cleanup(&mut self, hook: Arc<dyn CleanupHook>) -> &mut Self {
        self.cleanups.push(hook);
        self
    }

    pub fn modelers(&self) -> &[Arc<dyn Modeler>] {
        &self.modelers
    }

    /// Exact match first, then the longest matching prefix, then the default.
    pub fn indexer_for(&self, mimetype: &str) -> &dyn Indexer {
        if let Some((_, indexer)) = self.indexers.iter().find(|(pattern, _)| pattern == mimetype) {
            return indexer.as_ref();
        }
        self.indexers
            .iter()
            .filter(|(pattern, _)| pattern.ends_with('/') && mimetype.starts_with(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, indexer)| indexer.as_ref())
            .unwrap_or(self.default_indexer.as_ref())
    }
}

/// Counts from one pipeline run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub modeled: usize,
    pub indexed: usize,
    pub batches: usize,
}

/// Store index text and mark a group indexed, optionally recording its model.
pub async fn write_index(
    conn: &mut SqliteConnection,
    group_id: i64,
    model: Option<&str>,
    text: &IndexText,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE file_group SET
            model = COALESCE(?1, model),
            title = COALESCE(title, ?2),
            a_text = ?2,
            b_text = ?3,
            c_text = ?4,
            d_text = ?5,
            indexed = 1
        WHERE id = ?6
        "#,
    )
    .bind(model)
    .bind(text.a.as_deref())
    .bind(text.b.as_deref())
    .bind(text.c.as_deref())
    .bind(text.d.as_deref())
    .bind(group_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Drives modelers and indexers over every un-indexed group.
#[derive(Debug)]
pub struct PostProcessor<'a> {
    pool: &'a SqlitePool,
    hooks: &'a HookRegistry,
    batch_size: usize,
}

impl<'a> PostProcessor<'a> {
    pub fn new(pool: &'a SqlitePool, hooks: &'a HookRegistry, batch_size: usize) -> Self {
        Self {
            pool,
            hooks,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineSummary> {
        let mut summary = PipelineSummary::default();
        let mut after_id = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(HoardError::Cancelled("post-processing".into()));
            }

            let mut tx = self.pool.begin().await?;
            let groups = file_groups::fetch_unindexed_after(&mut tx, after_id, self.batch_size).await?;
            let Some(last) = groups.last() else { break };
            after_id = last.id;

            let mut pending: BTreeMap<i64, FileGroup> =
                groups.into_iter().map(|group| (group.id, group)).collect();
            let total = pending.len();

            for modeler in &self.hooks.modelers {
                if pending.is_empty() {
                    break;
                }
                modeler
                    .model(&mut pending, &mut tx)
                    .await
                    .map_err(|err| HoardError::Hook(format!("{}: {err}", modeler.name())))?;
            }
            summary.modeled += total - pending.len();

            for group in pending.values() {
                let mimetype = group.mimetype.as_deref().unwrap_or_default();
                let text = self.hooks.indexer_for(mimetype).index(group);
                write_index(&mut tx, group.id, None, &text).await?;
            }
            summary.indexed += pending.len();

            tx.commit().await?;
            summary.batches += 1;
            debug!(target: "files::pipeline", after_id, total, "processed batch");
            tokio::task::yield_now().await;
        }

        for hook in &self.hooks.cleanups {
            hook.cleanup(self.pool)
                .await
                .map_err(|err| HoardError::Hook(format!("{}: {err}", hook.name())))?;
        }

        if summary.batches > 0 {
            info!(
                target: "files::pipeline",
                modeled = summary.modeled,
                indexed = summary.indexed,
                batches = summary.batches,
                "post-processing complete"
            );
        }
        Ok(summary)
    }
}
