//! Processing: the paid phase of a sync run.
//!
//! Takes the new and edited files a discovery pass produced and, in
//! bounded concurrent batches, extracts metadata/embeddings, writes the
//! on-disk bundle, and indexes the result in the remote store. The disk
//! bundle is written *before* the remote write: if the disk write fails
//! the store is never called and the file is rediscovered as new on the
//! next run; if the remote write fails with a non-auth error the bundle
//! stays on disk and the relink pass re-pushes it later.
//!
//! An authorization failure aborts every file that has not started yet —
//! each subsequent call would fail identically, and extraction calls cost
//! money.

use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::bundle::{self, is_image_path};
use crate::config::ProcessingConfig;
use crate::events::{EventBus, SourceCreated};
use crate::extractor::Extractor;
use crate::models::{DiscoveredFile, Insights, SourceMetadata, SourceRecord};
use crate::path_index;
use crate::store::RemoteStore;

/// One successfully processed file.
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub id: String,
    pub title: String,
    /// Bundle directory relative to the data dir.
    pub relative_path: String,
}

/// Result of one pipeline invocation. Single-file failures are collected,
/// never thrown; `auth_failed` marks the run-invalidating case.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub processed: Vec<ProcessedFile>,
    pub errors: Vec<String>,
    pub auth_failed: bool,
}

enum FileResult {
    /// Bundle written; `store_warning` carries a non-fatal index failure.
    Done {
        file: ProcessedFile,
        store_warning: Option<String>,
        event: Option<SourceCreated>,
    },
    Failed(String),
    AuthFailed(String),
    Skipped,
}

pub async fn process_files(
    data_dir: &Path,
    config: &ProcessingConfig,
    files: Vec<DiscoveredFile>,
    store: Arc<dyn RemoteStore>,
    extractor: Arc<dyn Extractor>,
    events: &EventBus,
) -> ProcessOutcome {
    let mut outcome = ProcessOutcome::default();
    if files.is_empty() {
        return outcome;
    }

    let abort = Arc::new(AtomicBool::new(false));
    let concurrency = config.concurrency.max(1);
    let batches: Vec<Vec<DiscoveredFile>> =
        files.chunks(concurrency).map(|c| c.to_vec()).collect();
    let batch_count = batches.len();

    for (batch_index, batch) in batches.into_iter().enumerate() {
        if abort.load(Ordering::SeqCst) {
            break;
        }

        let mut tasks = JoinSet::new();
        for file in batch {
            let store = Arc::clone(&store);
            let extractor = Arc::clone(&extractor);
            let abort = Arc::clone(&abort);
            let data_dir = data_dir.to_path_buf();
            tasks.spawn(async move {
                if abort.load(Ordering::SeqCst) {
                    return FileResult::Skipped;
                }
                process_one(&data_dir, file, store.as_ref(), extractor.as_ref(), &abort).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => FileResult::Failed(format!("processing task panicked: {}", e)),
            };
            match result {
                FileResult::Done {
                    file,
                    store_warning,
                    event,
                } => {
                    // An edit can land at a new bundle path (retitled, or a
                    // different extraction date). Drop the superseded
                    // bundle; left behind, its stale hash would make the
                    // relink pass re-push old metadata under the same id.
                    let index = path_index::load_path_index(data_dir);
                    if let Some(old) = index.get(&file.id) {
                        if old != &file.relative_path {
                            let stale = data_dir.join(old);
                            if stale.exists() {
                                if let Err(e) = std::fs::remove_dir_all(&stale) {
                                    tracing::warn!(
                                        "failed to remove superseded bundle {}: {}",
                                        old,
                                        e
                                    );
                                }
                            }
                        }
                    }
                    // Bundle metadata is on disk, so the index entry is
                    // safe to record even when the remote write failed.
                    if let Err(e) =
                        path_index::add_to_path_index(data_dir, &file.id, &file.relative_path)
                    {
                        outcome
                            .errors
                            .push(format!("path index update failed for {}: {}", file.id, e));
                    }
                    if let Some(warning) = store_warning {
                        tracing::warn!("{}", warning);
                        outcome.errors.push(warning);
                    }
                    if let Some(event) = event {
                        events.publish(event);
                    }
                    outcome.processed.push(file);
                }
                FileResult::Failed(e) => {
                    tracing::warn!("{}", e);
                    outcome.errors.push(e);
                }
                FileResult::AuthFailed(e) => {
                    if !outcome.auth_failed {
                        outcome.auth_failed = true;
                        outcome.errors.push(e);
                    }
                }
                FileResult::Skipped => {}
            }
        }

        let last = batch_index + 1 == batch_count;
        if !last && !abort.load(Ordering::SeqCst) && config.batch_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(config.batch_delay_ms)).await;
        }
    }

    outcome
}

async fn process_one(
    data_dir: &Path,
    file: DiscoveredFile,
    store: &dyn RemoteStore,
    extractor: &dyn Extractor,
    abort: &AtomicBool,
) -> FileResult {
    let filename = file
        .absolute_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.relative_path.clone());

    // Normalize content. Images are replaced by a textual description;
    // the description becomes the searchable artifact.
    let (content, keep_original) = if is_image_path(&file.absolute_path) {
        let bytes = match std::fs::read(&file.absolute_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                return FileResult::Failed(format!(
                    "failed to read {}: {}",
                    file.absolute_path.display(),
                    e
                ))
            }
        };
        match extractor.describe_image(&bytes, &filename).await {
            Ok(description) => (description, false),
            Err(e) => {
                return FileResult::Failed(format!(
                    "image description failed for {}: {}",
                    file.relative_path, e
                ))
            }
        }
    } else {
        match std::fs::read(&file.absolute_path) {
            Ok(bytes) => (String::from_utf8_lossy(&bytes).into_owned(), true),
            Err(e) => {
                return FileResult::Failed(format!(
                    "failed to read {}: {}",
                    file.absolute_path.display(),
                    e
                ))
            }
        }
    };

    if abort.load(Ordering::SeqCst) {
        return FileResult::Skipped;
    }

    let extraction = match extractor.extract(&content, &filename).await {
        Ok(extraction) => extraction,
        Err(e) => {
            return FileResult::Failed(format!(
                "extraction failed for {}: {}",
                file.relative_path, e
            ))
        }
    };

    // Edits keep their id so history keys stay stable; new files mint one.
    let id = file
        .existing_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let created_at = extraction.date.unwrap_or(file.modified_at);
    let relative_path =
        path_index::compute_source_path(&file.project, &extraction.title, created_at, &id);

    let mut tags = extraction.tags.clone();
    tags.extend(extraction.participants.iter().cloned());

    let source_path = file.absolute_path.to_string_lossy().to_string();
    let original_file = keep_original.then(|| {
        let ext = bundle::extension_of(&file.absolute_path);
        if ext.is_empty() {
            "original".to_string()
        } else {
            format!("original.{}", ext)
        }
    });

    let metadata = SourceMetadata {
        id: id.clone(),
        title: extraction.title.clone(),
        source_type: "file".to_string(),
        content_type: extraction.content_type.clone(),
        created_at,
        imported_at: Utc::now(),
        projects: vec![file.project.clone()],
        tags: tags.clone(),
        source_path: source_path.clone(),
        content_hash: file.content_hash.clone(),
        sync_source: file.source_name.clone(),
        original_file: original_file.clone(),
    };
    let insights = Insights {
        summary: extraction.summary.clone(),
        themes: extraction.tags.clone(),
        quotes: Vec::new(),
    };

    // Disk before remote. A failed disk write leaves the file classified
    // as new on the next discovery, retried from scratch.
    let original = keep_original.then_some(file.absolute_path.as_path());
    if let Err(e) = bundle::write_bundle(
        data_dir,
        &relative_path,
        &metadata,
        &content,
        &insights,
        original,
    ) {
        return FileResult::Failed(format!(
            "bundle write failed for {}: {}",
            file.relative_path, e
        ));
    }

    let record = SourceRecord {
        id: id.clone(),
        title: extraction.title.clone(),
        content_type: extraction.content_type,
        created_at,
        projects: vec![file.project.clone()],
        tags,
        content_hash: file.content_hash.clone(),
        source_path: source_path.clone(),
        summary: extraction.summary,
        vector: Some(extraction.vector),
        has_full_content: true,
    };

    let processed = ProcessedFile {
        id: id.clone(),
        title: extraction.title.clone(),
        relative_path,
    };

    match store.add_source(&record).await {
        Ok(()) => FileResult::Done {
            event: Some(SourceCreated {
                id,
                title: processed.title.clone(),
                content_type: record.content_type.clone(),
                created_at,
                projects: record.projects.clone(),
                tags: record.tags.clone(),
                source_path,
                content_hash: record.content_hash.clone(),
                sync_source: metadata.sync_source.clone(),
                original_file,
            }),
            store_warning: None,
            file: processed,
        },
        Err(e) if e.is_unauthorized() => {
            abort.store(true, Ordering::SeqCst);
            FileResult::AuthFailed(e.to_string())
        }
        Err(e) => FileResult::Done {
            event: None,
            store_warning: Some(format!(
                "remote index write failed for {} (will relink later): {}",
                processed.relative_path, e
            )),
            file: processed,
        },
    }
}
