//! Sync source configuration records.
//!
//! Per-machine (never synced through the data directory), persisted as
//! JSON, CRUD by unique `name`.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::models::SyncSource;

/// Load all configured sync sources. A missing file is an empty list.
pub fn load_sources(path: &Path) -> Result<Vec<SyncSource>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sync sources from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse sync sources at {}", path.display()))
}

pub fn save_sources(path: &Path, sources: &[SyncSource]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(sources)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace sync sources at {}", path.display()))?;
    Ok(())
}

pub fn add_source(path: &Path, source: SyncSource) -> Result<()> {
    let mut sources = load_sources(path)?;
    if sources.iter().any(|s| s.name == source.name) {
        bail!("a sync source named '{}' already exists", source.name);
    }
    sources.push(source);
    save_sources(path, &sources)
}

pub fn remove_source(path: &Path, name: &str) -> Result<bool> {
    let mut sources = load_sources(path)?;
    let before = sources.len();
    sources.retain(|s| s.name != name);
    if sources.len() == before {
        return Ok(false);
    }
    save_sources(path, &sources)?;
    Ok(true)
}

pub fn set_enabled(path: &Path, name: &str, enabled: bool) -> Result<bool> {
    let mut sources = load_sources(path)?;
    let Some(source) = sources.iter_mut().find(|s| s.name == name) else {
        return Ok(false);
    };
    source.enabled = enabled;
    save_sources(path, &sources)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(name: &str) -> SyncSource {
        SyncSource {
            name: name.to_string(),
            path: "/tmp/notes".into(),
            glob: "**/*.md".to_string(),
            project: "personal".to_string(),
            enabled: true,
        }
    }

    #[test]
    fn crud_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("sources.json");

        add_source(&file, sample("notes")).unwrap();
        add_source(&file, sample("journal")).unwrap();
        assert!(add_source(&file, sample("notes")).is_err());

        let sources = load_sources(&file).unwrap();
        assert_eq!(sources.len(), 2);

        assert!(set_enabled(&file, "notes", false).unwrap());
        assert!(!set_enabled(&file, "missing", false).unwrap());
        let sources = load_sources(&file).unwrap();
        assert!(!sources.iter().find(|s| s.name == "notes").unwrap().enabled);

        assert!(remove_source(&file, "journal").unwrap());
        assert!(!remove_source(&file, "journal").unwrap());
        assert_eq!(load_sources(&file).unwrap().len(), 1);
    }
}
