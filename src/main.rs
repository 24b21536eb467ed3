//! # Lorebase CLI (`lore`)
//!
//! The `lore` binary drives the ingestion and synchronization engine:
//! one-shot sync runs, the background daemon, sync source configuration,
//! blocklist management, and path-index recovery.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lore sync` | Run one pull → discover → process → reconcile → push cycle |
//! | `lore daemon start` | Launch the background daemon (detached) |
//! | `lore daemon run` | Run the daemon loop in the foreground |
//! | `lore daemon stop` | Signal the daemon and wait for shutdown |
//! | `lore daemon status` | Report liveness and last-run counts |
//! | `lore source add/list/remove/enable/disable` | Manage watch roots |
//! | `lore block add/remove/list` | Manage the content-hash blocklist |
//! | `lore index rebuild` | Rebuild the path index from disk bundles |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use lorebase::config::{self, Config};
use lorebase::extractor::HttpExtractor;
use lorebase::models::SyncSource;
use lorebase::store::HttpRemoteStore;
use lorebase::sync::{SyncEngine, SyncOptions};
use lorebase::{blocklist, daemon, path_index, sources};

/// Lorebase — a git-backed personal knowledge repository.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; by default the platform config directory is used.
#[derive(Parser)]
#[command(
    name = "lore",
    about = "Lorebase — git-backed knowledge repository sync engine",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one full sync cycle.
    ///
    /// Pulls the data repository, discovers new and edited files across
    /// all enabled sources, processes them through the extractor, repairs
    /// local/remote divergence, and commits/pushes the results.
    Sync {
        /// Stop after discovery; mutate nothing.
        #[arg(long)]
        dry_run: bool,

        /// Skip the git pull before discovery.
        #[arg(long)]
        no_pull: bool,

        /// Skip the git commit/push after processing.
        #[arg(long)]
        no_push: bool,
    },

    /// Manage the background sync daemon.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Manage sync sources (watch roots).
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Manage the content-hash blocklist.
    Block {
        #[command(subcommand)]
        action: BlockAction,
    },

    /// Path index maintenance.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Launch the daemon as a detached background process.
    Start,
    /// Run the daemon loop in the foreground (used by `start`).
    Run,
    /// Signal the running daemon and wait for it to exit.
    Stop,
    /// Report daemon liveness and the last sync result.
    Status,
}

#[derive(Subcommand)]
enum SourceAction {
    /// Add a watch root.
    Add {
        /// Unique source name.
        name: String,
        /// Directory to watch.
        #[arg(long)]
        path: PathBuf,
        /// Glob applied to relative paths (e.g. `**/*.{md,txt}`).
        #[arg(long, default_value = "**/*.md")]
        glob: String,
        /// Project the ingested sources belong to.
        #[arg(long)]
        project: String,
    },
    /// List configured watch roots.
    List,
    /// Remove a watch root by name.
    Remove { name: String },
    /// Enable a watch root.
    Enable { name: String },
    /// Disable a watch root without removing it.
    Disable { name: String },
}

#[derive(Subcommand)]
enum BlockAction {
    /// Add a content hash to the blocklist.
    Add { hash: String },
    /// Remove a content hash from the blocklist.
    Remove { hash: String },
    /// List blocked content hashes.
    List,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Rebuild the path index by scanning bundle directories.
    Rebuild,
}

fn build_engine(config: &Config) -> Result<Arc<SyncEngine>> {
    let store = Arc::new(HttpRemoteStore::new(&config.store)?);
    let extractor = Arc::new(HttpExtractor::new(&config.extractor)?);
    Ok(Arc::new(SyncEngine::new(config.clone(), store, extractor)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let cfg = config::load_config(&config_path)?;

    // One-shot commands log warnings and above to stderr; the daemon
    // installs its own file-backed subscriber instead.
    if !matches!(
        cli.command,
        Commands::Daemon {
            action: DaemonAction::Run
        }
    ) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    match cli.command {
        Commands::Sync {
            dry_run,
            no_pull,
            no_push,
        } => {
            let engine = build_engine(&cfg)?;
            let sync_sources = sources::load_sources(&cfg.sources_file())?;
            let opts = SyncOptions {
                git_pull: !no_pull,
                git_push: !no_push,
                dry_run,
            };
            let outcome = engine.run(&sync_sources, &opts).await;

            if dry_run {
                println!("sync (dry-run)");
            } else {
                println!("sync");
            }
            if let Some(d) = &outcome.discovery {
                println!("  sources scanned: {}", d.sources_scanned);
                println!("  files: {} total, {} new, {} edited, {} existing",
                    d.total_files, d.new_files, d.edited_files, d.existing_files);
                for e in &d.errors {
                    println!("  discovery error: {}", e);
                }
            } else {
                println!("  no enabled sources configured");
            }
            if let Some(p) = &outcome.processing {
                println!("  processed: {}", p.processed);
                for title in &p.titles {
                    println!("    + {}", title);
                }
                for e in &p.errors {
                    println!("  processing error: {}", e);
                }
            }
            println!("  reconciled: {}", outcome.reconciled);
            println!(
                "  git: pulled={} pushed={}",
                outcome.git_pulled, outcome.git_pushed
            );
            if let Some(e) = &outcome.git_error {
                println!("  git error: {}", e);
            }
            println!("ok");
        }

        Commands::Daemon { action } => match action {
            DaemonAction::Run => {
                let engine = build_engine(&cfg)?;
                daemon::run_daemon(&cfg, engine).await?;
            }
            DaemonAction::Start => {
                if daemon::daemon_status(&cfg.state_dir())?.is_some() {
                    println!("daemon already running");
                    return Ok(());
                }
                let exe = std::env::current_exe()?;
                let mut cmd = std::process::Command::new(exe);
                cmd.arg("--config")
                    .arg(&config_path)
                    .args(["daemon", "run"])
                    .stdin(std::process::Stdio::null())
                    .stdout(std::process::Stdio::null())
                    .stderr(std::process::Stdio::null());
                let child = cmd.spawn()?;
                // Give it a moment to take the pid lock.
                std::thread::sleep(std::time::Duration::from_millis(500));
                match daemon::daemon_status(&cfg.state_dir())? {
                    Some(status) => println!("daemon started (pid {})", status.pid),
                    None => println!("daemon launched (pid {}), not yet confirmed", child.id()),
                }
            }
            DaemonAction::Stop => {
                if daemon::stop_daemon(&cfg.state_dir())? {
                    println!("daemon stopped");
                } else {
                    println!("daemon not running");
                }
            }
            DaemonAction::Status => match daemon::daemon_status(&cfg.state_dir())? {
                Some(status) => {
                    println!("daemon running (pid {})", status.pid);
                    println!("  started: {}", status.started_at);
                    match (&status.last_sync, &status.last_sync_result) {
                        (Some(at), Some(result)) => {
                            println!("  last sync: {}", at);
                            println!(
                                "    scanned {}, processed {}, errors {}",
                                result.files_scanned, result.files_processed, result.errors
                            );
                        }
                        _ => println!("  last sync: never"),
                    }
                }
                None => println!("daemon not running"),
            },
        },

        Commands::Source { action } => {
            let file = cfg.sources_file();
            match action {
                SourceAction::Add {
                    name,
                    path,
                    glob,
                    project,
                } => {
                    let path = std::fs::canonicalize(&path)
                        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
                    sources::add_source(
                        &file,
                        SyncSource {
                            name: name.clone(),
                            path,
                            glob,
                            project,
                            enabled: true,
                        },
                    )?;
                    println!("added source '{}'", name);
                }
                SourceAction::List => {
                    let list = sources::load_sources(&file)?;
                    if list.is_empty() {
                        println!("no sync sources configured");
                    }
                    for s in list {
                        println!(
                            "{} {}  project={} glob={} path={}",
                            if s.enabled { "[on] " } else { "[off]" },
                            s.name,
                            s.project,
                            s.glob,
                            s.path.display()
                        );
                    }
                }
                SourceAction::Remove { name } => {
                    if sources::remove_source(&file, &name)? {
                        println!("removed source '{}'", name);
                    } else {
                        println!("no source named '{}'", name);
                    }
                }
                SourceAction::Enable { name } => {
                    if sources::set_enabled(&file, &name, true)? {
                        println!("enabled source '{}'", name);
                    } else {
                        println!("no source named '{}'", name);
                    }
                }
                SourceAction::Disable { name } => {
                    if sources::set_enabled(&file, &name, false)? {
                        println!("disabled source '{}'", name);
                    } else {
                        println!("no source named '{}'", name);
                    }
                }
            }
        }

        Commands::Block { action } => match action {
            BlockAction::Add { hash } => {
                blocklist::add_to_blocklist(&cfg.data_dir, &hash)?;
                println!("blocked {}", hash);
            }
            BlockAction::Remove { hash } => {
                if blocklist::remove_from_blocklist(&cfg.data_dir, &hash)? {
                    println!("unblocked {}", hash);
                } else {
                    println!("{} was not blocked", hash);
                }
            }
            BlockAction::List => {
                let mut hashes: Vec<String> =
                    blocklist::load_blocklist(&cfg.data_dir).into_iter().collect();
                hashes.sort();
                if hashes.is_empty() {
                    println!("blocklist is empty");
                }
                for hash in hashes {
                    println!("{}", hash);
                }
            }
        },

        Commands::Index { action } => match action {
            IndexAction::Rebuild => {
                let index = path_index::rebuild_path_index(&cfg.data_dir)?;
                println!("path index rebuilt: {} entries", index.len());
            }
        },
    }

    Ok(())
}
