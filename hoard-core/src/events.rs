use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::Result;

/// Notifications emitted at phase boundaries. Observers get a readable
/// summary via [`EngineEvent::message`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    DiscoveryStarted {
        paths: Vec<PathBuf>,
    },
    DiscoveryCompleted {
        new: usize,
        modified: usize,
        deleted: usize,
    },
    ModelingCompleted {
        groups: usize,
    },
    IndexingCompleted {
        groups: usize,
    },
    DirectoryRefreshStarted {
        path: PathBuf,
    },
    DirectoryRefreshCompleted {
        path: PathBuf,
    },
    MoveCompleted {
        destination: PathBuf,
        files: usize,
    },
    MoveFailed {
        destination: PathBuf,
        error: String,
    },
    TagsChanged {
        tag: Option<String>,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::DiscoveryStarted { .. } => "discovery_started",
            EngineEvent::DiscoveryCompleted { .. } => "discovery_completed",
            EngineEvent::ModelingCompleted { .. } => "modeling_completed",
            EngineEvent::IndexingCompleted { .. } => "indexing_completed",
            EngineEvent::DirectoryRefreshStarted { .. } => "directory_refresh_started",
            EngineEvent::DirectoryRefreshCompleted { .. } => "directory_refresh_completed",
            EngineEvent::MoveCompleted { .. } => "move_completed",
            EngineEvent::MoveFailed { .. } => "move_failed",
            EngineEvent::TagsChanged { .. } => "tags_changed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            EngineEvent::DiscoveryStarted { paths } if paths.is_empty() => {
                "Refreshing all files".to_string()
            }
            EngineEvent::DiscoveryStarted { paths } => {
                format!("Refreshing {} path(s)", paths.len())
            }
            EngineEvent::DiscoveryCompleted {
                new,
                modified,
                deleted,
            } => format!(
                "Discovered {new} new, {modified} modified, and {deleted} deleted file groups"
            ),
            EngineEvent::ModelingCompleted { groups } => {
                format!("Modeled {groups} file groups")
            }
            EngineEvent::IndexingCompleted { groups } => {
                format!("Indexed {groups} file groups")
            }
            EngineEvent::DirectoryRefreshStarted { path } => {
                format!("Refreshing {}", path.display())
            }
            EngineEvent::DirectoryRefreshCompleted { path } => {
                format!("Refreshed {}", path.display())
            }
            EngineEvent::MoveCompleted { destination, files } => {
                format!("Moved {files} files to {}", destination.display())
            }
            EngineEvent::MoveFailed { destination, error } => {
                format!("Moving files to {} failed: {error}", destination.display())
            }
            EngineEvent::TagsChanged { tag: Some(tag) } => format!("Tag {tag} changed"),
            EngineEvent::TagsChanged { tag: None } => "Tags changed".to_string(),
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EngineEvent) -> Result<()>;
}

/// In-process fan-out of engine events.
pub struct InProcEventBus {
    sender: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for InProcEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InProcEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Subscription as a `Stream`; lagged receivers surface as errors.
    pub fn stream(&self) -> BroadcastStream<EngineEvent> {
        BroadcastStream::new(self.subscribe())
    }
}

#[async_trait]
impl EventPublisher for InProcEventBus {
    async fn publish(&self, event: EngineEvent) -> Result<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }
}

// Lets generic callers subscribe without naming the concrete bus.
pub trait EngineEventStream {
    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent>;
}

impl EngineEventStream for InProcEventBus {
    fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = InProcEventBus::new(8);
        let mut stream = bus.stream();

        bus.publish(EngineEvent::ModelingCompleted { groups: 3 })
            .await
            .unwrap();

        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.kind(), "modeling_completed");
        assert_eq!(event.message(), "Modeled 3 file groups");
    }

    #[tokio::test]
    async fn publishing_without_subscribers_succeeds() {
        let bus = InProcEventBus::default();
        assert!(bus.publish(EngineEvent::TagsChanged { tag: None }).await.is_ok());
    }
}
