//! End-to-end sync engine tests with in-process store and extractor
//! doubles. The data directory, bundles, path index, and blocklist are
//! all real files in a tempdir; only the network seams are mocked.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use lorebase::blocklist;
use lorebase::bundle;
use lorebase::config::Config;
use lorebase::discover::hash_bytes;
use lorebase::extractor::{Extraction, Extractor};
use lorebase::models::{SourceRecord, SyncSource};
use lorebase::path_index;
use lorebase::reconcile;
use lorebase::store::{RemoteStore, StoreError, StoreResult};
use lorebase::sync::{SyncEngine, SyncOptions};

/// In-memory store double. Tracks known hashes and path mappings the way
/// the real backend would, so repeat runs classify correctly.
#[derive(Default)]
struct MockStore {
    records: Mutex<Vec<SourceRecord>>,
    hashes: Mutex<HashSet<String>>,
    mappings: Mutex<HashMap<String, String>>,
    remote_content: Mutex<HashMap<String, String>>,
    backfilled: Mutex<Vec<String>>,
    add_calls: AtomicUsize,
    reject_writes: AtomicBool,
}

impl MockStore {
    fn record_ids(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }

    fn insert_record(&self, record: SourceRecord) {
        self.hashes.lock().unwrap().insert(record.content_hash.clone());
        if !record.source_path.is_empty() {
            self.mappings
                .lock()
                .unwrap()
                .insert(record.source_path.clone(), record.id.clone());
        }
        let mut records = self.records.lock().unwrap();
        records.retain(|r| r.id != record.id);
        records.push(record);
    }
}

#[async_trait]
impl RemoteStore for MockStore {
    async fn check_auth(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn add_source(&self, record: &SourceRecord) -> StoreResult<()> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unauthorized("token revoked".to_string()));
        }
        self.insert_record(record.clone());
        Ok(())
    }

    async fn existing_content_hashes(&self, hashes: &[String]) -> StoreResult<HashSet<String>> {
        let known = self.hashes.lock().unwrap();
        Ok(hashes.iter().filter(|h| known.contains(*h)).cloned().collect())
    }

    async fn source_path_mappings(&self, paths: &[String]) -> StoreResult<HashMap<String, String>> {
        let mappings = self.mappings.lock().unwrap();
        Ok(paths
            .iter()
            .filter_map(|p| mappings.get(p).map(|id| (p.clone(), id.clone())))
            .collect())
    }

    async fn list_sources(&self) -> StoreResult<Vec<SourceRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn fetch_full_content(&self, ids: &[String]) -> StoreResult<HashMap<String, String>> {
        let content = self.remote_content.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| content.get(id).map(|c| (id.clone(), c.clone())))
            .collect())
    }

    async fn backfill_content(&self, items: &[(String, String)]) -> StoreResult<()> {
        let mut backfilled = self.backfilled.lock().unwrap();
        backfilled.extend(items.iter().map(|(id, _)| id.clone()));
        Ok(())
    }
}

/// Extractor double: deterministic metadata derived from the text, with a
/// call counter so tests can assert extraction spend.
#[derive(Default)]
struct MockExtractor {
    extract_calls: AtomicUsize,
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, text: &str, filename: &str) -> anyhow::Result<Extraction> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        let title = text
            .lines()
            .next()
            .map(|l| l.trim_start_matches('#').trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| filename.to_string());
        Ok(Extraction {
            title,
            summary: format!("summary of {}", filename),
            content_type: "note".to_string(),
            date: None,
            participants: Vec::new(),
            tags: vec!["test".to_string()],
            vector: vec![0.1, 0.2, 0.3],
        })
    }

    async fn describe_image(&self, _image: &[u8], filename: &str) -> anyhow::Result<String> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("An image named {}", filename))
    }
}

struct Harness {
    _tmp: TempDir,
    data_dir: std::path::PathBuf,
    watch_dir: std::path::PathBuf,
    store: Arc<MockStore>,
    extractor: Arc<MockExtractor>,
    engine: SyncEngine,
    sources: Vec<SyncSource>,
}

fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let data_dir = tmp.path().join("data");
    let watch_dir = tmp.path().join("notes");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::create_dir_all(&watch_dir).unwrap();

    let store = Arc::new(MockStore::default());
    let extractor = Arc::new(MockExtractor::default());
    let mut config = Config::minimal(data_dir.clone());
    config.processing.concurrency = 1;
    config.processing.batch_delay_ms = 0;
    let engine = SyncEngine::new(
        config,
        Arc::clone(&store) as Arc<dyn RemoteStore>,
        Arc::clone(&extractor) as Arc<dyn Extractor>,
    );
    let sources = vec![SyncSource {
        name: "notes".to_string(),
        path: watch_dir.clone(),
        glob: "**/*.md".to_string(),
        project: "personal".to_string(),
        enabled: true,
    }];

    Harness {
        _tmp: tmp,
        data_dir,
        watch_dir,
        store,
        extractor,
        engine,
        sources,
    }
}

fn local_opts() -> SyncOptions {
    SyncOptions {
        git_pull: false,
        git_push: false,
        dry_run: false,
    }
}

fn git(repo: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
}

#[tokio::test]
async fn hello_world_end_to_end() {
    let h = harness();
    init_repo(&h.data_dir);
    std::fs::write(h.watch_dir.join("hello.md"), "Hello world").unwrap();

    let mut events = h.engine.events().subscribe();
    let outcome = h
        .engine
        .run(&h.sources, &SyncOptions { git_pull: false, git_push: true, dry_run: false })
        .await;

    let discovery = outcome.discovery.as_ref().unwrap();
    assert_eq!(discovery.total_files, 1);
    assert_eq!(discovery.new_files, 1);
    let processing = outcome.processing.as_ref().unwrap();
    assert_eq!(processing.processed, 1);
    assert!(processing.errors.is_empty());

    // Remote record carries the content hash of the raw bytes.
    let records = h.store.records.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content_hash, hash_bytes(b"Hello world"));
    assert!(records[0].has_full_content);

    // Bundle on disk, reachable through the path index.
    let index = path_index::load_path_index(&h.data_dir);
    let rel = index.get(&records[0].id).unwrap();
    let dir = h.data_dir.join(rel);
    assert_eq!(bundle::read_content(&dir).unwrap(), "Hello world");
    let meta = bundle::read_metadata(&dir).unwrap();
    assert_eq!(meta.content_hash, records[0].content_hash);
    assert_eq!(meta.sync_source, "notes");
    assert!(dir.join("insights.json").exists());
    assert!(dir.join("original.md").exists());

    // The run committed the new bundle (no remote, so no push).
    assert!(!outcome.git_pushed);
    let log = git(&h.data_dir, &["log", "--oneline"]);
    assert_eq!(log.lines().count(), 1);
    assert!(log.contains("1 processed"));

    let event = events.try_recv().unwrap();
    assert_eq!(event.id, records[0].id);
    assert_eq!(event.content_hash, records[0].content_hash);
}

#[tokio::test]
async fn second_run_is_idempotent() {
    let h = harness();
    std::fs::write(h.watch_dir.join("a.md"), "# Alpha\n\nbody").unwrap();

    let first = h.engine.run(&h.sources, &local_opts()).await;
    assert_eq!(first.processing.as_ref().unwrap().processed, 1);
    assert_eq!(h.extractor.extract_calls.load(Ordering::SeqCst), 1);

    let second = h.engine.run(&h.sources, &local_opts()).await;
    let discovery = second.discovery.as_ref().unwrap();
    assert_eq!(discovery.total_files, 1);
    assert_eq!(discovery.new_files, 0);
    assert_eq!(discovery.existing_files, 1);
    assert!(second.processing.is_none());
    // No further extraction spend.
    assert_eq!(h.extractor.extract_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn identical_content_is_processed_once() {
    let h = harness();
    std::fs::write(h.watch_dir.join("one.md"), "same bytes").unwrap();
    std::fs::write(h.watch_dir.join("two.md"), "same bytes").unwrap();

    let outcome = h.engine.run(&h.sources, &local_opts()).await;
    let discovery = outcome.discovery.as_ref().unwrap();
    assert_eq!(discovery.total_files, 2);
    assert_eq!(discovery.new_files, 1);
    assert_eq!(discovery.existing_files, 1);
    assert_eq!(outcome.processing.as_ref().unwrap().processed, 1);
    assert_eq!(h.store.record_ids().len(), 1);
}

#[tokio::test]
async fn identical_content_across_sources_is_processed_once() {
    let h = harness();
    let journal_dir = h._tmp.path().join("journal");
    std::fs::create_dir_all(&journal_dir).unwrap();
    std::fs::write(h.watch_dir.join("a.md"), "identical bytes").unwrap();
    std::fs::write(journal_dir.join("b.md"), "identical bytes").unwrap();

    let mut sources = h.sources.clone();
    sources.push(SyncSource {
        name: "journal".to_string(),
        path: journal_dir,
        glob: "**/*.md".to_string(),
        project: "personal".to_string(),
        enabled: true,
    });

    let outcome = h.engine.run(&sources, &local_opts()).await;
    let discovery = outcome.discovery.as_ref().unwrap();
    assert_eq!(discovery.sources_scanned, 2);
    assert_eq!(discovery.total_files, 2);
    assert_eq!(discovery.new_files, 1);
    assert_eq!(discovery.existing_files, 1);
    assert_eq!(outcome.processing.as_ref().unwrap().processed, 1);
    // One extraction spend for the shared content, not one per source.
    assert_eq!(h.extractor.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.record_ids().len(), 1);
}

#[tokio::test]
async fn run_without_sources_still_flushes_unpushed_commits() {
    let h = harness();
    init_repo(&h.data_dir);
    std::fs::write(h.data_dir.join("seed.md"), "seed").unwrap();
    git(&h.data_dir, &["add", "-A"]);
    git(&h.data_dir, &["commit", "-q", "-m", "stranded"]);

    let bare = h._tmp.path().join("remote.git");
    std::fs::create_dir_all(&bare).unwrap();
    git(&bare, &["init", "-q", "--bare"]);
    git(&h.data_dir, &["remote", "add", "origin", bare.to_str().unwrap()]);

    // All sources disabled (or removed) since the failed push.
    let outcome = h
        .engine
        .run(&[], &SyncOptions { git_pull: false, git_push: true, dry_run: false })
        .await;

    assert!(outcome.discovery.is_none());
    assert!(outcome.git_pushed);
    assert!(git(&bare, &["log", "--oneline", "--all"]).contains("stranded"));
}

#[tokio::test]
async fn edits_keep_their_id() {
    let h = harness();
    let file = h.watch_dir.join("plan.md");
    std::fs::write(&file, "# Plan\n\nv1").unwrap();

    h.engine.run(&h.sources, &local_opts()).await;
    let original_id = h.store.record_ids()[0].clone();

    std::fs::write(&file, "# Plan\n\nv2, revised").unwrap();
    let outcome = h.engine.run(&h.sources, &local_opts()).await;

    let discovery = outcome.discovery.as_ref().unwrap();
    assert_eq!(discovery.edited_files, 1);
    assert_eq!(discovery.new_files, 0);
    assert_eq!(outcome.processing.as_ref().unwrap().processed, 1);

    // Same id, updated hash.
    let records = h.store.records.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, original_id);
    assert_eq!(records[0].content_hash, hash_bytes(b"# Plan\n\nv2, revised"));
}

#[tokio::test]
async fn edits_replace_the_superseded_bundle() {
    let h = harness();
    let file = h.watch_dir.join("plan.md");
    std::fs::write(&file, "# Plan\n\nv1").unwrap();
    h.engine.run(&h.sources, &local_opts()).await;

    let id = h.store.record_ids()[0].clone();
    let old_rel = path_index::load_path_index(&h.data_dir)
        .get(&id)
        .unwrap()
        .clone();

    // Retitling moves the bundle to a new slug.
    std::fs::write(&file, "# Roadmap\n\nv2").unwrap();
    h.engine.run(&h.sources, &local_opts()).await;

    let new_rel = path_index::load_path_index(&h.data_dir)
        .get(&id)
        .unwrap()
        .clone();
    assert_ne!(new_rel, old_rel);
    assert!(!h.data_dir.join(&old_rel).exists());
    assert_eq!(
        bundle::read_content(&h.data_dir.join(&new_rel)).unwrap(),
        "# Roadmap\n\nv2"
    );

    // No stale bundle left for relink to resurrect over the fresh edit.
    let relinked = reconcile::relink_bundles(&h.data_dir, h.store.as_ref()).await;
    assert_eq!(relinked, 0);
    let records = h.store.records.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content_hash, hash_bytes(b"# Roadmap\n\nv2"));
    assert_eq!(records[0].title, "Roadmap");
}

#[tokio::test]
async fn bundle_write_failure_skips_the_remote_write() {
    let h = harness();
    std::fs::write(h.watch_dir.join("a.md"), "doomed").unwrap();
    // A file squatting on the bundle root makes every bundle write fail.
    std::fs::write(h.data_dir.join("sources"), "in the way").unwrap();

    let outcome = h.engine.run(&h.sources, &local_opts()).await;

    let processing = outcome.processing.as_ref().unwrap();
    assert_eq!(processing.processed, 0);
    assert_eq!(processing.errors.len(), 1);
    assert!(processing.errors[0].contains("bundle write failed"));
    // Extraction happened, but the failed disk write stopped the file
    // before the store was touched.
    assert_eq!(h.extractor.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.add_calls.load(Ordering::SeqCst), 0);
    assert!(path_index::load_path_index(&h.data_dir).is_empty());
}

#[tokio::test]
async fn images_are_ingested_as_descriptions() {
    let h = harness();
    let mut sources = h.sources.clone();
    sources[0].glob = "**/*.{md,png}".to_string();
    std::fs::write(h.watch_dir.join("pic.png"), b"\x89PNG fake bytes").unwrap();

    let outcome = h.engine.run(&sources, &local_opts()).await;
    assert_eq!(outcome.processing.as_ref().unwrap().processed, 1);

    // The record hashes the raw image bytes.
    let records = h.store.records.lock().unwrap().clone();
    assert_eq!(records[0].content_hash, hash_bytes(b"\x89PNG fake bytes"));

    // The description is the searchable artifact; the binary itself is
    // not copied into the bundle.
    let index = path_index::load_path_index(&h.data_dir);
    let dir = h.data_dir.join(index.get(&records[0].id).unwrap());
    assert_eq!(bundle::read_content(&dir).unwrap(), "An image named pic.png");
    let meta = bundle::read_metadata(&dir).unwrap();
    assert!(meta.original_file.is_none());
    for entry in std::fs::read_dir(&dir).unwrap() {
        let name = entry.unwrap().file_name().to_string_lossy().to_string();
        assert!(!name.starts_with("original"), "unexpected {}", name);
    }
}

#[tokio::test]
async fn blocklisted_content_is_suppressed() {
    let h = harness();
    let body = "deleted once, stays deleted";
    std::fs::write(h.watch_dir.join("ghost.md"), body).unwrap();
    blocklist::add_to_blocklist(&h.data_dir, &hash_bytes(body.as_bytes())).unwrap();

    let outcome = h.engine.run(&h.sources, &local_opts()).await;
    let discovery = outcome.discovery.as_ref().unwrap();
    assert_eq!(discovery.total_files, 1);
    assert_eq!(discovery.new_files, 0);
    assert_eq!(discovery.existing_files, 1);
    assert!(outcome.processing.is_none());
    assert_eq!(h.extractor.extract_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dotfiles_and_skip_dirs_are_ignored() {
    let h = harness();
    std::fs::write(h.watch_dir.join("kept.md"), "kept").unwrap();
    std::fs::create_dir_all(h.watch_dir.join(".obsidian")).unwrap();
    std::fs::write(h.watch_dir.join(".obsidian/cache.md"), "hidden").unwrap();
    std::fs::create_dir_all(h.watch_dir.join("node_modules/pkg")).unwrap();
    std::fs::write(h.watch_dir.join("node_modules/pkg/readme.md"), "dep").unwrap();
    std::fs::write(h.watch_dir.join("notes.txt"), "wrong extension").unwrap();

    let outcome = h.engine.run(&h.sources, &local_opts()).await;
    assert_eq!(outcome.discovery.as_ref().unwrap().total_files, 1);
    assert_eq!(outcome.processing.as_ref().unwrap().processed, 1);
}

#[tokio::test]
async fn auth_failure_aborts_remaining_extractions() {
    let h = harness();
    for i in 0..5 {
        std::fs::write(h.watch_dir.join(format!("f{}.md", i)), format!("file {}", i)).unwrap();
    }
    h.store.reject_writes.store(true, Ordering::SeqCst);

    let outcome = h.engine.run(&h.sources, &local_opts()).await;

    let processing = outcome.processing.as_ref().unwrap();
    assert_eq!(processing.processed, 0);
    assert_eq!(processing.errors.len(), 1);
    assert!(processing.errors[0].contains("authorization failed"));
    // Only the first file reached the extractor; the abort stopped the
    // other four before any extraction spend.
    assert_eq!(h.extractor.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.reconciled, 0);
}

#[tokio::test]
async fn dry_run_mutates_nothing() {
    let h = harness();
    std::fs::write(h.watch_dir.join("a.md"), "content").unwrap();

    let outcome = h
        .engine
        .run(
            &h.sources,
            &SyncOptions { git_pull: false, git_push: false, dry_run: true },
        )
        .await;

    assert_eq!(outcome.discovery.as_ref().unwrap().new_files, 1);
    assert!(outcome.processing.is_none());
    assert_eq!(h.extractor.extract_calls.load(Ordering::SeqCst), 0);
    assert!(h.store.record_ids().is_empty());
    assert!(!h.data_dir.join("sources").exists());
}

#[tokio::test]
async fn path_index_rebuild_recovers_deleted_index() {
    let h = harness();
    std::fs::write(h.watch_dir.join("a.md"), "first note").unwrap();
    std::fs::write(h.watch_dir.join("b.md"), "second note").unwrap();
    h.engine.run(&h.sources, &local_opts()).await;

    let before = path_index::load_path_index(&h.data_dir);
    assert_eq!(before.len(), 2);

    std::fs::remove_file(h.data_dir.join(path_index::PATH_INDEX_FILE)).unwrap();
    let rebuilt = path_index::rebuild_path_index(&h.data_dir).unwrap();
    assert_eq!(rebuilt, before);
    assert_eq!(path_index::load_path_index(&h.data_dir), before);
}

#[tokio::test]
async fn reconcile_fills_stub_content_from_remote() {
    let h = harness();

    // A record another machine produced: bundle dir exists here but holds
    // only the placeholder, and the origin file is not on this machine.
    let id = "aaaa1111-2222-3333-4444-555566667777".to_string();
    let rel = path_index::compute_source_path("personal", "Remote Note", Utc::now(), &id);
    let dir = h.data_dir.join(&rel);
    bundle::write_content(&dir, bundle::CONTENT_PLACEHOLDER).unwrap();
    path_index::add_to_path_index(&h.data_dir, &id, &rel).unwrap();

    h.store.insert_record(SourceRecord {
        id: id.clone(),
        title: "Remote Note".to_string(),
        content_type: "note".to_string(),
        created_at: Utc::now(),
        projects: vec!["personal".to_string()],
        tags: vec![],
        content_hash: "hash-remote".to_string(),
        source_path: "/elsewhere/remote-note.md".to_string(),
        summary: String::new(),
        vector: None,
        has_full_content: true,
    });
    h.store
        .remote_content
        .lock()
        .unwrap()
        .insert(id.clone(), "full text from remote".to_string());

    let repaired = reconcile::reconcile(&h.data_dir, h.store.as_ref()).await;
    assert_eq!(repaired, 1);
    assert_eq!(bundle::read_content(&dir).unwrap(), "full text from remote");
}

#[tokio::test]
async fn reconcile_backfills_records_without_remote_content() {
    let h = harness();

    let id = "bbbb1111-2222-3333-4444-555566667777".to_string();
    let rel = path_index::compute_source_path("personal", "Old Note", Utc::now(), &id);
    bundle::write_content(&h.data_dir.join(&rel), "pre-existing local text").unwrap();
    path_index::add_to_path_index(&h.data_dir, &id, &rel).unwrap();

    h.store.insert_record(SourceRecord {
        id: id.clone(),
        title: "Old Note".to_string(),
        content_type: "note".to_string(),
        created_at: Utc::now(),
        projects: vec!["personal".to_string()],
        tags: vec![],
        content_hash: "hash-old".to_string(),
        source_path: "/elsewhere/old-note.md".to_string(),
        summary: String::new(),
        vector: None,
        has_full_content: false,
    });

    let repaired = reconcile::reconcile(&h.data_dir, h.store.as_ref()).await;
    assert_eq!(repaired, 1);
    assert_eq!(h.store.backfilled.lock().unwrap().clone(), vec![id]);
}

#[tokio::test]
async fn relink_repushes_bundles_missing_from_store() {
    let h = harness();
    std::fs::write(h.watch_dir.join("a.md"), "indexed then lost").unwrap();
    h.engine.run(&h.sources, &local_opts()).await;
    let id = h.store.record_ids()[0].clone();

    // Simulate a store that lost the record (or a write that failed).
    h.store.records.lock().unwrap().clear();
    h.store.hashes.lock().unwrap().clear();
    // And a lost index entry on top.
    std::fs::remove_file(h.data_dir.join(path_index::PATH_INDEX_FILE)).unwrap();

    let relinked = reconcile::relink_bundles(&h.data_dir, h.store.as_ref()).await;
    // One index repair plus one store re-push.
    assert_eq!(relinked, 2);
    assert_eq!(h.store.record_ids(), [id.clone()]);
    // The re-pushed record has no vector and no remote content yet.
    let records = h.store.records.lock().unwrap().clone();
    assert!(records[0].vector.is_none());
    assert!(!records[0].has_full_content);
    assert!(path_index::load_path_index(&h.data_dir).contains_key(&id));
}
