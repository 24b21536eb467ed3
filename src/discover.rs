//! Discovery: the free phase of a sync run.
//!
//! Walks a configured watch root, applies the source's glob, hashes every
//! candidate, and classifies each file as existing, blocked, edited, or
//! new by cross-referencing the remote store (two batched reads) and the
//! blocklist. Discovery performs zero extractor calls, so it is safe to
//! run unconditionally and frequently.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use walkdir::WalkDir;

use crate::glob::matches_glob;
use crate::models::{DiscoveredFile, SyncSource};
use crate::store::RemoteStore;

/// Directory names skipped during the walk, in addition to dotfiles.
const SKIP_DIRS: &[&str] = &["node_modules", "__pycache__", "target"];

/// Classification outcome for one watch root. Never an `Err`: a missing
/// directory or failed store lookup yields an empty result with an error
/// string.
#[derive(Debug, Default)]
pub struct DiscoveryResult {
    pub source_name: String,
    pub total_files: usize,
    /// New and edited files, in path order. Edited files carry
    /// `existing_id`.
    pub to_process: Vec<DiscoveredFile>,
    pub new_count: usize,
    pub edited_count: usize,
    pub existing_count: usize,
    pub errors: Vec<String>,
}

/// SHA-256 digest of raw bytes; the identity key for deduplication.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Discover one watch root. `seen_this_run` spans the whole run: content
/// already seen under an earlier source (or earlier in this one) counts
/// as existing, so identical bytes are extracted at most once per run.
pub async fn discover_source(
    source: &SyncSource,
    store: &dyn RemoteStore,
    blocklist: &HashSet<String>,
    seen_this_run: &mut HashSet<String>,
) -> DiscoveryResult {
    let mut result = DiscoveryResult {
        source_name: source.name.clone(),
        ..Default::default()
    };

    if !source.path.is_dir() {
        result.errors.push(format!(
            "source '{}' directory does not exist: {}",
            source.name,
            source.path.display()
        ));
        return result;
    }

    let mut candidates = collect_candidates(source, &mut result.errors);
    candidates.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    result.total_files = candidates.len();

    if candidates.is_empty() {
        return result;
    }

    // Two batched remote reads classify the whole candidate set.
    let hashes: Vec<String> = candidates.iter().map(|c| c.content_hash.clone()).collect();
    let existing = match store.existing_content_hashes(&hashes).await {
        Ok(set) => set,
        Err(e) => {
            result.errors.push(format!("hash lookup failed: {}", e));
            return result;
        }
    };
    let paths: Vec<String> = candidates
        .iter()
        .map(|c| c.absolute_path.to_string_lossy().to_string())
        .collect();
    let mappings = match store.source_path_mappings(&paths).await {
        Ok(map) => map,
        Err(e) => {
            result.errors.push(format!("path lookup failed: {}", e));
            return result;
        }
    };

    classify(candidates, &existing, &mappings, blocklist, seen_this_run, &mut result);
    result
}

fn collect_candidates(source: &SyncSource, errors: &mut Vec<String>) -> Vec<DiscoveredFile> {
    let mut candidates = Vec::new();
    let walker = WalkDir::new(&source.path).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        let is_root = e.depth() == 0;
        is_root || (!name.starts_with('.') && !SKIP_DIRS.contains(&name.as_ref()))
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                errors.push(format!("walk error under {}: {}", source.path.display(), e));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path
            .strip_prefix(&source.path)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        if !matches_glob(&relative, &source.glob) {
            continue;
        }

        match read_candidate(path, &relative, source) {
            Ok(file) => candidates.push(file),
            Err(e) => errors.push(format!("unreadable file {}: {}", path.display(), e)),
        }
    }
    candidates
}

fn read_candidate(
    path: &Path,
    relative: &str,
    source: &SyncSource,
) -> anyhow::Result<DiscoveredFile> {
    let bytes = std::fs::read(path)?;
    let metadata = std::fs::metadata(path)?;
    let modified = metadata
        .modified()
        .map(chrono::DateTime::<chrono::Utc>::from)
        .unwrap_or_else(|_| chrono::Utc::now());

    Ok(DiscoveredFile {
        absolute_path: path.to_path_buf(),
        relative_path: relative.to_string(),
        content_hash: hash_bytes(&bytes),
        size: metadata.len(),
        modified_at: modified,
        source_name: source.name.clone(),
        project: source.project.clone(),
        existing_id: None,
    })
}

fn classify(
    candidates: Vec<DiscoveredFile>,
    existing: &HashSet<String>,
    mappings: &HashMap<String, String>,
    blocklist: &HashSet<String>,
    seen_this_run: &mut HashSet<String>,
    result: &mut DiscoveryResult,
) {
    // Dedup within the run: the first copy of identical content wins,
    // later copies count as existing.
    for mut file in candidates {
        let hash = &file.content_hash;
        if existing.contains(hash) || blocklist.contains(hash) || seen_this_run.contains(hash) {
            result.existing_count += 1;
            continue;
        }
        seen_this_run.insert(hash.clone());

        let abs = file.absolute_path.to_string_lossy().to_string();
        if let Some(id) = mappings.get(&abs) {
            file.existing_id = Some(id.clone());
            result.edited_count += 1;
        } else {
            result.new_count += 1;
        }
        result.to_process.push(file);
    }
}
