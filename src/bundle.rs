//! On-disk source bundles.
//!
//! One directory per ingested source, containing `metadata.json` (remote
//! record mirror plus provenance), `content.md` (the normalized text, even
//! for images), `insights.json`, and optionally a verbatim copy of the
//! original file. `metadata.json` is always written first so the path
//! index stays reconstructable from disk if a later write is interrupted.

use anyhow::{Context, Result};
use std::path::Path;

use crate::models::{Insights, SourceMetadata};

pub const SOURCES_DIR: &str = "sources";
pub const METADATA_FILE: &str = "metadata.json";
pub const CONTENT_FILE: &str = "content.md";
pub const INSIGHTS_FILE: &str = "insights.json";

/// Placeholder body written when a bundle's text is not yet available on
/// this machine. Reconciliation treats it as missing content.
pub const CONTENT_PLACEHOLDER: &str = "_Content not yet synced to this machine._";

/// Extensions treated as images: processed via the vision extractor, and
/// the original binary is not copied into the bundle.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Extensions reconciliation will re-read directly from the origin path.
pub const TEXT_EXTENSIONS: &[&str] = &[
    "md", "markdown", "txt", "text", "org", "rst", "json", "yaml", "yml", "toml", "csv", "html",
];

pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn is_image_path(path: &Path) -> bool {
    IMAGE_EXTENSIONS.contains(&extension_of(path).as_str())
}

pub fn is_known_text_path(path: &Path) -> bool {
    TEXT_EXTENSIONS.contains(&extension_of(path).as_str())
}

/// True when `content` carries no real text (empty or the local
/// placeholder).
pub fn content_is_stub(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed.is_empty() || trimmed == CONTENT_PLACEHOLDER
}

/// Write a complete bundle under `data_dir/relative_path`.
///
/// Write order matters: `metadata.json` lands before anything else, and
/// the caller updates the path index only after this function returns.
pub fn write_bundle(
    data_dir: &Path,
    relative_path: &str,
    metadata: &SourceMetadata,
    content: &str,
    insights: &Insights,
    original: Option<&Path>,
) -> Result<()> {
    let dir = data_dir.join(relative_path);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create bundle directory {}", dir.display()))?;

    let meta_json = serde_json::to_string_pretty(metadata)?;
    std::fs::write(dir.join(METADATA_FILE), meta_json)
        .with_context(|| format!("Failed to write metadata for {}", metadata.id))?;

    std::fs::write(dir.join(CONTENT_FILE), content)
        .with_context(|| format!("Failed to write content for {}", metadata.id))?;

    let insights_json = serde_json::to_string_pretty(insights)?;
    std::fs::write(dir.join(INSIGHTS_FILE), insights_json)
        .with_context(|| format!("Failed to write insights for {}", metadata.id))?;

    if let Some(source) = original {
        let ext = extension_of(source);
        let name = if ext.is_empty() {
            "original".to_string()
        } else {
            format!("original.{}", ext)
        };
        std::fs::copy(source, dir.join(name)).with_context(|| {
            format!("Failed to copy original file {}", source.display())
        })?;
    }

    Ok(())
}

pub fn read_metadata(bundle_dir: &Path) -> Result<SourceMetadata> {
    let path = bundle_dir.join(METADATA_FILE);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn read_content(bundle_dir: &Path) -> Result<String> {
    let path = bundle_dir.join(CONTENT_FILE);
    std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn write_content(bundle_dir: &Path, content: &str) -> Result<()> {
    std::fs::create_dir_all(bundle_dir)?;
    std::fs::write(bundle_dir.join(CONTENT_FILE), content)
        .with_context(|| format!("Failed to write content under {}", bundle_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample_metadata() -> SourceMetadata {
        SourceMetadata {
            id: "11112222-3333-4444-5555-666677778888".to_string(),
            title: "Sample".to_string(),
            source_type: "file".to_string(),
            content_type: "note".to_string(),
            created_at: Utc::now(),
            imported_at: Utc::now(),
            projects: vec!["work".to_string()],
            tags: vec![],
            source_path: "/tmp/sample.md".to_string(),
            content_hash: "deadbeef".to_string(),
            sync_source: "notes".to_string(),
            original_file: Some("original.md".to_string()),
        }
    }

    #[test]
    fn bundle_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let meta = sample_metadata();
        write_bundle(
            tmp.path(),
            "sources/work/2025-01-01-sample/11112222",
            &meta,
            "# Sample\n\nbody",
            &Insights::default(),
            None,
        )
        .unwrap();

        let dir = tmp.path().join("sources/work/2025-01-01-sample/11112222");
        let read = read_metadata(&dir).unwrap();
        assert_eq!(read.id, meta.id);
        assert_eq!(read_content(&dir).unwrap(), "# Sample\n\nbody");
        assert!(dir.join(INSIGHTS_FILE).exists());
    }

    #[test]
    fn stub_detection() {
        assert!(content_is_stub(""));
        assert!(content_is_stub("  \n"));
        assert!(content_is_stub(CONTENT_PLACEHOLDER));
        assert!(!content_is_stub("real text"));
    }

    #[test]
    fn image_and_text_classification() {
        assert!(is_image_path(Path::new("a/b/shot.PNG")));
        assert!(!is_image_path(Path::new("a/b/notes.md")));
        assert!(is_known_text_path(Path::new("notes.md")));
        assert!(!is_known_text_path(Path::new("archive.zip")));
    }
}
