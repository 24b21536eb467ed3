//! Outbound engine events.
//!
//! After a source is successfully indexed, the pipeline publishes a
//! [`SourceCreated`] event for hook consumers (extensions, MCP callers).
//! Publishing never blocks or fails the ingesting file's success path:
//! with no subscribers the event is simply dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
pub struct SourceCreated {
    pub id: String,
    pub title: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub projects: Vec<String>,
    pub tags: Vec<String>,
    pub source_path: String,
    pub content_hash: String,
    pub sync_source: String,
    pub original_file: Option<String>,
}

/// Broadcast channel for engine events. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SourceCreated>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SourceCreated> {
        self.tx.subscribe()
    }

    /// Fire-and-forget publish. Subscriber lag or absence is not an error.
    pub fn publish(&self, event: SourceCreated) {
        if self.tx.send(event).is_err() {
            tracing::debug!("source-created event dropped: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
