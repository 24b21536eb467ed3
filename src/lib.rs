//! # Lorebase
//!
//! A git-backed personal/team knowledge repository: the ingestion and
//! synchronization engine behind the `lore` CLI.
//!
//! Lorebase ingests documents from configured watch roots, deduplicates
//! them by content hash, extracts metadata and embeddings via an external
//! extractor, writes human-browsable source bundles into a git-backed
//! data directory, and keeps the remote metadata/vector index and every
//! machine's working copy reconciled.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌───────────┐
//! │  Daemon   │──▶│ Orchestr. │──▶│ Discovery  │──▶│ Processing │
//! │ watch+poll│   │ (sync.rs) │   │ hash+class │   │ extract+   │
//! └──────────┘   └─────┬─────┘   └────────────┘   │ bundle+idx │
//!                      │                          └─────┬─────┘
//!                ┌─────▼─────┐   ┌────────────┐         │
//!                │ Git sync  │   │ Reconcile  │◀────────┘
//!                │ pull/push │   │ relink/fix │
//!                └───────────┘   └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`glob`] | Watch-root glob dialect |
//! | [`discover`] | Free classification phase (hashing + batched lookups) |
//! | [`process`] | Paid phase (extraction, bundles, remote indexing) |
//! | [`bundle`] | On-disk source bundle layout |
//! | [`path_index`] | id → bundle path cache with disk rebuild |
//! | [`blocklist`] | Tombstone suppression of deleted content |
//! | [`git_sync`] | Stash-protected pull and commit/push |
//! | [`reconcile`] | Local/remote divergence repair |
//! | [`sync`] | Orchestrator composing one run |
//! | [`daemon`] | Debounced watcher + periodic sync loop |
//! | [`store`] | Remote metadata/vector store client |
//! | [`extractor`] | External metadata/embedding extractor client |
//! | [`events`] | `SourceCreated` hook events |
//! | [`sources`] | Per-machine sync source records |

pub mod blocklist;
pub mod bundle;
pub mod config;
pub mod daemon;
pub mod discover;
pub mod events;
pub mod extractor;
pub mod git_sync;
pub mod glob;
pub mod models;
pub mod path_index;
pub mod process;
pub mod reconcile;
pub mod sources;
pub mod store;
pub mod sync;
