//! Reconciliation: repair divergence between the remote index and local
//! disk without spending extraction budget.
//!
//! Two passes, both best-effort — a single unreadable or unwritable file
//! is skipped and retried on the next run, never aborts:
//!
//! - [`relink_bundles`]: scan disk bundles, re-register any missing from
//!   the path index, and re-push to the store any whose content hash it
//!   does not know. This is the permanent recovery route for "disk write
//!   succeeded, remote write failed".
//! - [`reconcile`]: for every remote source, ensure a real local
//!   `content.md` (origin re-read first, then one batched remote fetch),
//!   and backfill remote content for records that predate remote content
//!   storage.

use std::collections::HashMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::bundle::{self, SOURCES_DIR};
use crate::models::{SourceMetadata, SourceRecord};
use crate::path_index;
use crate::store::RemoteStore;

/// Scan bundle directories and repair index/store gaps. Returns the
/// number of bundles relinked (indexed locally or re-pushed remotely).
pub async fn relink_bundles(data_dir: &Path, store: &dyn RemoteStore) -> usize {
    let sources_root = data_dir.join(SOURCES_DIR);
    if !sources_root.exists() {
        return 0;
    }

    let mut index = path_index::load_path_index(data_dir);
    let mut relinked = 0usize;
    let mut bundles: Vec<(SourceMetadata, std::path::PathBuf)> = Vec::new();

    for entry in WalkDir::new(&sources_root).into_iter().filter_map(|e| e.ok()) {
        if entry.file_name() != "metadata.json" {
            continue;
        }
        let Some(dir) = entry.path().parent() else {
            continue;
        };
        match bundle::read_metadata(dir) {
            Ok(meta) => bundles.push((meta, dir.to_path_buf())),
            Err(e) => tracing::warn!("skipping unreadable bundle {}: {}", dir.display(), e),
        }
    }

    // Index self-heal: every bundle on disk gets an index entry.
    for (meta, dir) in &bundles {
        if index.contains_key(&meta.id) {
            continue;
        }
        let rel = dir
            .strip_prefix(data_dir)
            .unwrap_or(dir)
            .to_string_lossy()
            .replace('\\', "/");
        match path_index::add_to_path_index(data_dir, &meta.id, &rel) {
            Ok(()) => {
                index.insert(meta.id.clone(), rel);
                relinked += 1;
            }
            Err(e) => tracing::warn!("failed to relink {} into path index: {}", meta.id, e),
        }
    }

    // Store self-heal: re-push bundles the store has never seen. No
    // extraction spend; metadata and content are already on disk.
    let hashes: Vec<String> = bundles.iter().map(|(m, _)| m.content_hash.clone()).collect();
    let known = match store.existing_content_hashes(&hashes).await {
        Ok(known) => known,
        Err(e) => {
            tracing::warn!("relink hash lookup failed: {}", e);
            return relinked;
        }
    };

    for (meta, dir) in &bundles {
        if known.contains(&meta.content_hash) {
            continue;
        }
        let summary = std::fs::read_to_string(dir.join(bundle::INSIGHTS_FILE))
            .ok()
            .and_then(|s| serde_json::from_str::<crate::models::Insights>(&s).ok())
            .map(|i| i.summary)
            .unwrap_or_default();
        let record = SourceRecord {
            id: meta.id.clone(),
            title: meta.title.clone(),
            content_type: meta.content_type.clone(),
            created_at: meta.created_at,
            projects: meta.projects.clone(),
            tags: meta.tags.clone(),
            content_hash: meta.content_hash.clone(),
            source_path: meta.source_path.clone(),
            summary,
            vector: None,
            has_full_content: false,
        };
        match store.add_source(&record).await {
            Ok(()) => relinked += 1,
            Err(e) => {
                tracing::warn!("relink of {} failed: {}", meta.id, e);
                if e.is_unauthorized() {
                    break;
                }
            }
        }
    }

    relinked
}

/// Align local content with the remote index. Returns the number of
/// sources repaired locally plus records backfilled remotely.
pub async fn reconcile(data_dir: &Path, store: &dyn RemoteStore) -> usize {
    let records = match store.list_sources().await {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("reconciliation skipped, source listing failed: {}", e);
            return 0;
        }
    };

    let index = path_index::load_path_index(data_dir);
    let mut repaired = 0usize;
    let mut fetch_ids: Vec<String> = Vec::new();
    let mut bundle_dirs: HashMap<String, std::path::PathBuf> = HashMap::new();
    let mut backfill: Vec<(String, String)> = Vec::new();

    for record in &records {
        if record.source_path.is_empty() {
            continue;
        }
        let rel = match index.get(&record.id) {
            Some(rel) => rel.clone(),
            None => path_index::compute_source_path(
                record.projects.first().map(String::as_str).unwrap_or("misc"),
                &record.title,
                record.created_at,
                &record.id,
            ),
        };
        let dir = data_dir.join(&rel);
        bundle_dirs.insert(record.id.clone(), dir.clone());

        let local = bundle::read_content(&dir).unwrap_or_default();
        if !bundle::content_is_stub(&local) {
            if !record.has_full_content {
                backfill.push((record.id.clone(), local));
            }
            continue;
        }

        // Prefer the origin file on disk; it costs no network round-trip.
        let origin = Path::new(&record.source_path);
        if bundle::is_known_text_path(origin) && origin.is_file() {
            match std::fs::read_to_string(origin) {
                Ok(text) if !bundle::content_is_stub(&text) => {
                    match bundle::write_content(&dir, &text) {
                        Ok(()) => {
                            repaired += 1;
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!("local repair of {} failed: {}", record.id, e)
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("origin read for {} failed: {}", record.id, e),
            }
        }
        fetch_ids.push(record.id.clone());
    }

    // One batched fetch covers everything still missing.
    if !fetch_ids.is_empty() {
        match store.fetch_full_content(&fetch_ids).await {
            Ok(content) => {
                for (id, text) in content {
                    let Some(dir) = bundle_dirs.get(&id) else {
                        continue;
                    };
                    match bundle::write_content(dir, &text) {
                        Ok(()) => repaired += 1,
                        Err(e) => tracing::warn!("remote repair of {} failed: {}", id, e),
                    }
                }
            }
            Err(e) => tracing::warn!("batched content fetch failed: {}", e),
        }
    }

    // Backfill phase: push local content for records that predate remote
    // content storage. One batched write.
    if !backfill.is_empty() {
        match store.backfill_content(&backfill).await {
            Ok(()) => repaired += backfill.len(),
            Err(e) => tracing::warn!("content backfill failed: {}", e),
        }
    }

    repaired
}
