//! Shared fixtures for engine integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hoard_core::database::{self, file_groups};
use hoard_core::pipeline::HookRegistry;
use hoard_core::{EngineConfig, EngineContext, InProcEventBus, Refresher};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A media root and catalog database living in one temporary directory.
pub struct Library {
    _tmp: TempDir,
    pub root: PathBuf,
    pub ctx: EngineContext,
    pub events: Arc<InProcEventBus>,
}

impl Library {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut EngineConfig)) -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let base = std::fs::canonicalize(tmp.path()).expect("canonical tempdir");
        let root = base.join("media");
        std::fs::create_dir_all(&root).expect("media root");

        let url = format!("sqlite://{}", base.join("catalog.db").display());
        let pool = database::open(&url, 4).await.expect("catalog database");

        let mut config = EngineConfig::new(&root);
        configure(&mut config);

        let events = Arc::new(InProcEventBus::new(64));
        let ctx = EngineContext::with_parts(
            pool,
            config,
            Arc::new(HookRegistry::with_builtin()),
            events.clone(),
        );
        Self {
            _tmp: tmp,
            root,
            ctx,
            events,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Create `relative` (and its parents) with `contents`.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("parent dirs");
        }
        std::fs::write(&path, contents).expect("write file");
        path
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    /// Refresh `relative` directories (everything when empty).
    pub async fn refresh(&self, relative: &[&str]) -> hoard_core::RefreshSummary {
        let paths: Vec<PathBuf> = relative.iter().map(|r| self.path(r)).collect();
        Refresher::new(&self.ctx)
            .refresh(&paths, &CancellationToken::new(), |_| {})
            .await
            .expect("refresh")
    }

    /// Every cataloged primary path, relative to the media root, sorted.
    pub async fn primaries(&self) -> Vec<String> {
        let mut conn = self.ctx.pool.acquire().await.expect("connection");
        let mut primaries: Vec<String> = file_groups::fetch_under(&mut conn, &self.root)
            .await
            .expect("fetch groups")
            .into_iter()
            .map(|group| relative(&self.root, &group.primary_path))
            .collect();
        primaries.sort();
        primaries
    }

    /// `(id, primary)` pairs, sorted by primary.
    pub async fn groups_by_primary(&self) -> Vec<(i64, String)> {
        let mut conn = self.ctx.pool.acquire().await.expect("connection");
        let mut groups: Vec<(i64, String)> = file_groups::fetch_under(&mut conn, &self.root)
            .await
            .expect("fetch groups")
            .into_iter()
            .map(|group| (group.id, relative(&self.root, &group.primary_path)))
            .collect();
        groups.sort_by(|a, b| a.1.cmp(&b.1));
        groups
    }

    pub async fn scalar(&self, sql: &str) -> i64 {
        sqlx::query_scalar(sql)
            .fetch_one(&self.ctx.pool)
            .await
            .expect("scalar query")
    }
}

pub fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
