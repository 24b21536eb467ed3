//! Persisted set of content hashes that must never be re-ingested.
//!
//! Soft-deleting a source adds its hash; restoring removes it. The set
//! lives in the git-backed data directory so tombstones propagate to every
//! machine. Writes are atomic (tmp + rename) and last-writer-wins, which
//! is acceptable for a set of content hashes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const BLOCKLIST_FILE: &str = "blocklist.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct BlocklistFile {
    #[serde(default)]
    blocked: Vec<String>,
}

fn blocklist_path(data_dir: &Path) -> PathBuf {
    data_dir.join(BLOCKLIST_FILE)
}

/// Load the blocked hash set. A missing or unreadable file is an empty set.
pub fn load_blocklist(data_dir: &Path) -> HashSet<String> {
    let path = blocklist_path(data_dir);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return HashSet::new();
    };
    match serde_json::from_str::<BlocklistFile>(&content) {
        Ok(file) => file.blocked.into_iter().collect(),
        Err(e) => {
            tracing::warn!("ignoring corrupt blocklist at {}: {}", path.display(), e);
            HashSet::new()
        }
    }
}

/// Add a content hash to the blocklist. Idempotent.
pub fn add_to_blocklist(data_dir: &Path, hash: &str) -> Result<()> {
    let mut set = load_blocklist(data_dir);
    set.insert(hash.to_string());
    persist(data_dir, &set)
}

/// Remove a content hash from the blocklist. Returns whether it was present.
pub fn remove_from_blocklist(data_dir: &Path, hash: &str) -> Result<bool> {
    let mut set = load_blocklist(data_dir);
    let removed = set.remove(hash);
    if removed {
        persist(data_dir, &set)?;
    }
    Ok(removed)
}

fn persist(data_dir: &Path, set: &HashSet<String>) -> Result<()> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
    let mut blocked: Vec<String> = set.iter().cloned().collect();
    blocked.sort();
    let json = serde_json::to_string_pretty(&BlocklistFile { blocked })?;

    let path = blocklist_path(data_dir);
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write blocklist to {}", tmp.display()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("Failed to replace blocklist at {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(load_blocklist(tmp.path()).is_empty());
    }

    #[test]
    fn add_remove_roundtrip() {
        let tmp = TempDir::new().unwrap();
        add_to_blocklist(tmp.path(), "abc123").unwrap();
        add_to_blocklist(tmp.path(), "def456").unwrap();
        add_to_blocklist(tmp.path(), "abc123").unwrap();

        let set = load_blocklist(tmp.path());
        assert_eq!(set.len(), 2);
        assert!(set.contains("abc123"));

        assert!(remove_from_blocklist(tmp.path(), "abc123").unwrap());
        assert!(!remove_from_blocklist(tmp.path(), "abc123").unwrap());
        assert!(!load_blocklist(tmp.path()).contains("abc123"));
    }

    #[test]
    fn corrupt_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(BLOCKLIST_FILE), "not json").unwrap();
        assert!(load_blocklist(tmp.path()).is_empty());
    }
}
