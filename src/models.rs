//! Core data models used throughout Lorebase.
//!
//! These types represent the watch roots, discovered files, source records,
//! and run results that flow through the discovery and processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured watch root. Per-machine, keyed by unique `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSource {
    pub name: String,
    pub path: std::path::PathBuf,
    pub glob: String,
    pub project: String,
    pub enabled: bool,
}

/// Ephemeral record produced per discovery run for a file that needs
/// processing. `existing_id` is set only when the same path previously
/// produced a different content hash (an edit).
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub absolute_path: std::path::PathBuf,
    pub relative_path: String,
    pub content_hash: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub source_name: String,
    pub project: String,
    pub existing_id: Option<String>,
}

/// Authoritative source record as held by the remote store.
///
/// `content_hash` identifies ingested *content*; `source_path` + `id`
/// identify an *origin*. A hash change at the same path is an edit and
/// keeps its `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub title: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub projects: Vec<String>,
    pub tags: Vec<String>,
    pub content_hash: String,
    pub source_path: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub has_full_content: bool,
}

/// Contents of a bundle's `metadata.json`. Mirrors the remote record plus
/// local provenance (`sync_source`, `original_file`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub id: String,
    pub title: String,
    pub source_type: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub imported_at: DateTime<Utc>,
    pub projects: Vec<String>,
    pub tags: Vec<String>,
    pub source_path: String,
    pub content_hash: String,
    pub sync_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file: Option<String>,
}

/// Contents of a bundle's `insights.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Insights {
    pub summary: String,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub quotes: Vec<String>,
}

/// Per-run discovery summary merged into [`SyncOutcome`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverySummary {
    pub sources_scanned: usize,
    pub total_files: usize,
    pub new_files: usize,
    pub edited_files: usize,
    pub existing_files: usize,
    pub errors: Vec<String>,
}

/// Per-run processing summary merged into [`SyncOutcome`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub processed: usize,
    pub errors: Vec<String>,
    pub titles: Vec<String>,
}

/// Structured result of one orchestrator run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub git_pulled: bool,
    pub git_pushed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoverySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing: Option<ProcessingSummary>,
    pub reconciled: usize,
}

/// Compact counts persisted in `daemon.status.json` after every run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastSyncResult {
    pub files_scanned: usize,
    pub files_processed: usize,
    pub errors: usize,
}

/// Daemon liveness and last-run status, persisted per machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_result: Option<LastSyncResult>,
}

impl SyncOutcome {
    /// Collapse a full outcome into the compact daemon status counts.
    pub fn as_last_sync_result(&self) -> LastSyncResult {
        let d = self.discovery.clone().unwrap_or_default();
        let p = self.processing.clone().unwrap_or_default();
        LastSyncResult {
            files_scanned: d.total_files,
            files_processed: p.processed,
            errors: d.errors.len() + p.errors.len() + usize::from(self.git_error.is_some()),
        }
    }
}
