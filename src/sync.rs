//! Sync orchestration.
//!
//! Composes one full run: pull → discovery across all enabled sources →
//! auth preflight → processing → relink → reconciliation → commit/push.
//! Produces a single structured [`SyncOutcome`]; partial failures are
//! carried in it rather than thrown.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::blocklist;
use crate::config::Config;
use crate::discover;
use crate::events::EventBus;
use crate::extractor::Extractor;
use crate::git_sync;
use crate::models::{
    DiscoverySummary, ProcessingSummary, SyncOutcome, SyncSource,
};
use crate::process;
use crate::reconcile;
use crate::store::RemoteStore;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub git_pull: bool,
    pub git_push: bool,
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            git_pull: true,
            git_push: true,
            dry_run: false,
        }
    }
}

/// Owns the remote-store connection and the extractor for the lifetime of
/// the engine; both are injected, never global.
pub struct SyncEngine {
    data_dir: PathBuf,
    config: Config,
    store: Arc<dyn RemoteStore>,
    extractor: Arc<dyn Extractor>,
    events: EventBus,
}

impl SyncEngine {
    pub fn new(
        config: Config,
        store: Arc<dyn RemoteStore>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            config,
            store,
            extractor,
            events: EventBus::default(),
        }
    }

    /// Event bus carrying `SourceCreated` notifications for hook
    /// consumers.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Drop cached store connection state (auth-retry path).
    pub fn reset_store(&self) {
        self.store.reset();
    }

    /// Execute one orchestrator run over the given sync sources.
    pub async fn run(&self, sources: &[SyncSource], opts: &SyncOptions) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();

        if opts.git_pull {
            match git_sync::pull(&self.data_dir, &self.config.git.remote) {
                Ok(pull) => {
                    outcome.git_pulled = pull.pulled;
                    tracing::info!("git pull: {}", pull.message);
                }
                Err(e) => {
                    tracing::warn!("git pull failed: {}", e);
                    outcome.git_error = Some(e.to_string());
                }
            }
        }

        // With no enabled sources there is nothing to discover, but the
        // run still reconciles and flushes any unpushed backlog below.
        let enabled: Vec<&SyncSource> = sources.iter().filter(|s| s.enabled).collect();
        let mut to_process = Vec::new();
        if enabled.is_empty() {
            tracing::info!("no enabled sync sources configured; nothing to discover");
        } else {
            // Discovery is free: hashing plus two batched store reads per
            // source, no extractor calls. The seen-hash set spans all
            // sources so duplicate content is extracted once per run.
            let blocked = blocklist::load_blocklist(&self.data_dir);
            let mut seen_this_run = HashSet::new();
            let mut summary = DiscoverySummary::default();
            for source in &enabled {
                let result = discover::discover_source(
                    source,
                    self.store.as_ref(),
                    &blocked,
                    &mut seen_this_run,
                )
                .await;
                summary.sources_scanned += 1;
                summary.total_files += result.total_files;
                summary.new_files += result.new_count;
                summary.edited_files += result.edited_count;
                summary.existing_files += result.existing_count;
                summary.errors.extend(result.errors);
                to_process.extend(result.to_process);
            }
            outcome.discovery = Some(summary);
        }

        if opts.dry_run {
            return outcome;
        }

        let mut auth_failed = false;
        if !to_process.is_empty() {
            // Fail fast before spending extraction budget on a run whose
            // writes would all be rejected.
            if let Err(e) = self.store.check_auth().await {
                if e.is_unauthorized() {
                    tracing::error!("auth preflight failed: {}", e);
                    outcome.processing = Some(ProcessingSummary {
                        processed: 0,
                        errors: vec![e.to_string()],
                        titles: Vec::new(),
                    });
                    auth_failed = true;
                } else {
                    // A transient store failure is not a reason to skip;
                    // individual writes are file-scoped and tolerated.
                    tracing::warn!("auth preflight inconclusive: {}", e);
                }
            }

            if !auth_failed {
                let result = process::process_files(
                    &self.data_dir,
                    &self.config.processing,
                    to_process,
                    Arc::clone(&self.store),
                    Arc::clone(&self.extractor),
                    &self.events,
                )
                .await;
                auth_failed = result.auth_failed;
                outcome.processing = Some(ProcessingSummary {
                    processed: result.processed.len(),
                    titles: result.processed.iter().map(|p| p.title.clone()).collect(),
                    errors: result.errors,
                });
            }
        }

        if !auth_failed {
            let relinked = reconcile::relink_bundles(&self.data_dir, self.store.as_ref()).await;
            let repaired = reconcile::reconcile(&self.data_dir, self.store.as_ref()).await;
            outcome.reconciled = relinked + repaired;
        }

        // Push runs even with zero new files so a prior run's unpushed
        // commit gets flushed. Bundles written before an auth abort are
        // local state and safe to commit.
        if opts.git_push && self.config.git.push {
            let processed = outcome
                .processing
                .as_ref()
                .map(|p| p.processed)
                .unwrap_or(0);
            let message = format!(
                "Sync: {} processed, {} reconciled",
                processed, outcome.reconciled
            );
            match git_sync::commit_and_push(&self.data_dir, &self.config.git.remote, &message) {
                Ok(push) => {
                    outcome.git_pushed = push.pushed;
                    tracing::info!("git push: {}", push.message);
                }
                Err(e) => {
                    tracing::warn!("git commit/push failed: {}", e);
                    let error = e.to_string();
                    outcome.git_error = Some(match outcome.git_error.take() {
                        Some(prev) => format!("{}; {}", prev, error),
                        None => error,
                    });
                }
            }
        }

        outcome
    }
}
