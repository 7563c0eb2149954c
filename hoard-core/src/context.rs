use std::fmt;
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::EngineConfig;
use crate::events::{EventPublisher, InProcEventBus};
use crate::paths::MediaRoot;
use crate::pipeline::HookRegistry;
use crate::scanner::FileScanner;

/// Shared handles every engine operation needs.
#[derive(Clone)]
pub struct EngineContext {
    pub pool: SqlitePool,
    pub config: Arc<EngineConfig>,
    pub media_root: MediaRoot,
    pub scanner: Arc<FileScanner>,
    pub hooks: Arc<HookRegistry>,
    pub events: Arc<dyn EventPublisher>,
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("media_root", &self.media_root)
            .field("pool_size", &self.pool.size())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl EngineContext {
    /// Context with the built-in hooks and a fresh in-process event bus.
    pub fn new(pool: SqlitePool, config: EngineConfig) -> Self {
        Self::with_parts(
            pool,
            config,
            Arc::new(HookRegistry::with_builtin()),
            Arc::new(InProcEventBus::default()),
        )
    }

    pub fn with_parts(
        pool: SqlitePool,
        config: EngineConfig,
        hooks: Arc<HookRegistry>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let media_root = MediaRoot::new(config.media_root.clone());
        let scanner = Arc::new(FileScanner::new(&config));
        Self {
            pool,
            config: Arc::new(config),
            media_root,
            scanner,
            hooks,
            events,
        }
    }

    /// Publish an event; delivery failures are logged, never returned.
    pub async fn emit(&self, event: crate::events::EngineEvent) {
        let kind = event.kind();
        if let Err(err) = self.events.publish(event).await {
            tracing::warn!(target: "files::events", kind, error = %err, "failed to publish event");
        }
    }
}
