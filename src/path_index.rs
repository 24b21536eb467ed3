//! Path index: a persisted map from source id to its on-disk bundle path.
//!
//! The index is a cache over the bundle directories, never authoritative.
//! Because every bundle writes `metadata.json` before its index entry, the
//! whole map can be rebuilt from disk when the index file is lost or
//! diverges ([`rebuild_path_index`]).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::bundle::{self, SOURCES_DIR};

pub const PATH_INDEX_FILE: &str = "path-index.json";

fn index_path(data_dir: &Path) -> PathBuf {
    data_dir.join(PATH_INDEX_FILE)
}

/// Load the id → relative-path map. A missing or corrupt file is empty.
pub fn load_path_index(data_dir: &Path) -> HashMap<String, String> {
    let path = index_path(data_dir);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return HashMap::new();
    };
    match serde_json::from_str(&content) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!("ignoring corrupt path index at {}: {}", path.display(), e);
            HashMap::new()
        }
    }
}

pub fn add_to_path_index(data_dir: &Path, id: &str, relative_path: &str) -> Result<()> {
    let mut index = load_path_index(data_dir);
    index.insert(id.to_string(), relative_path.to_string());
    persist(data_dir, &index)
}

pub fn remove_from_path_index(data_dir: &Path, id: &str) -> Result<bool> {
    let mut index = load_path_index(data_dir);
    let removed = index.remove(id).is_some();
    if removed {
        persist(data_dir, &index)?;
    }
    Ok(removed)
}

/// Reconstruct the entire index by scanning bundle directories and reading
/// each `metadata.json`. Missing or corrupt entries are skipped. The
/// rebuilt map replaces the persisted index file.
pub fn rebuild_path_index(data_dir: &Path) -> Result<HashMap<String, String>> {
    let mut index = HashMap::new();
    let sources_root = data_dir.join(SOURCES_DIR);
    if sources_root.exists() {
        for entry in WalkDir::new(&sources_root)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_name() != "metadata.json" {
                continue;
            }
            let bundle_dir = match entry.path().parent() {
                Some(dir) => dir,
                None => continue,
            };
            match bundle::read_metadata(bundle_dir) {
                Ok(meta) => {
                    let rel = bundle_dir
                        .strip_prefix(data_dir)
                        .unwrap_or(bundle_dir)
                        .to_string_lossy()
                        .replace('\\', "/");
                    index.insert(meta.id, rel);
                }
                Err(e) => {
                    tracing::warn!("skipping unreadable bundle {}: {}", bundle_dir.display(), e);
                }
            }
        }
    }
    persist(data_dir, &index)?;
    Ok(index)
}

fn persist(data_dir: &Path, index: &HashMap<String, String>) -> Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    let json = serde_json::to_string_pretty(index)?;
    let path = index_path(data_dir);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write path index to {}", tmp.display()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("Failed to replace path index at {}", path.display()))?;
    Ok(())
}

/// Derive the human-browsable bundle path for a source:
/// `sources/<project>/<YYYY-MM-DD>-<slug>/<id fragment>`. The id fragment
/// keeps paths unique even when titles collide.
pub fn compute_source_path(
    project: &str,
    title: &str,
    created_at: DateTime<Utc>,
    id: &str,
) -> String {
    let date = created_at.format("%Y-%m-%d");
    let fragment: String = id.chars().filter(|c| *c != '-').take(8).collect();
    format!(
        "{}/{}/{}-{}/{}",
        SOURCES_DIR,
        slugify(project),
        date,
        slugify(title),
        fragment
    )
}

/// Lowercase, alphanumerics kept, everything else collapsed to single `-`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_dash = true;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Meeting Notes: Q3 / Planning!"), "meeting-notes-q3-planning");
        assert_eq!(slugify("___"), "untitled");
    }

    #[test]
    fn source_paths_are_unique_per_id() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
        let a = compute_source_path("work", "Same Title", ts, "aaaa1111-0000");
        let b = compute_source_path("work", "Same Title", ts, "bbbb2222-0000");
        assert_ne!(a, b);
        assert!(a.starts_with("sources/work/2025-03-14-same-title/"));
        assert!(a.ends_with("aaaa1111"));
    }

    #[test]
    fn add_remove_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        add_to_path_index(tmp.path(), "id-1", "sources/p/x/aaaa").unwrap();
        add_to_path_index(tmp.path(), "id-2", "sources/p/y/bbbb").unwrap();

        let index = load_path_index(tmp.path());
        assert_eq!(index.get("id-1").unwrap(), "sources/p/x/aaaa");

        assert!(remove_from_path_index(tmp.path(), "id-1").unwrap());
        assert!(!load_path_index(tmp.path()).contains_key("id-1"));
    }
}
