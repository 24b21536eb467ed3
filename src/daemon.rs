//! Background sync daemon.
//!
//! A long-lived process that debounces filesystem events into pull-less
//! sync runs and runs a pull-enabled sync on a timer to pick up other
//! machines' changes. Liveness is an advisory lock on `daemon.pid`: if
//! the lock can be acquired the previous daemon is dead, so a stale file
//! self-heals instead of producing a false "already running".
//!
//! Run scheduling is an explicit state machine (Idle → Debouncing →
//! Running → Running+Pending) so the coalescing guarantee is simple to
//! verify: any number of triggers during a run collapse into exactly one
//! rerun.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use fs2::FileExt;
use notify::{EventKind, RecursiveMode, Watcher};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::models::{DaemonStatus, SyncOutcome};
use crate::sources;
use crate::sync::{SyncEngine, SyncOptions};

pub const PID_FILE: &str = "daemon.pid";
pub const STATUS_FILE: &str = "daemon.status.json";
pub const LOG_FILE: &str = "daemon.log";

#[derive(Debug, PartialEq)]
enum SchedulerState {
    Idle,
    Debouncing { deadline: Instant },
    Running { pending: bool },
}

/// Coalesces triggers into runs. At most one run is in flight; triggers
/// during a run set a single pending flag, never an unbounded queue.
struct Scheduler {
    state: SchedulerState,
    debounce: Duration,
}

impl Scheduler {
    fn new(debounce: Duration) -> Self {
        Self {
            state: SchedulerState::Idle,
            debounce,
        }
    }

    /// A filesystem change arrived. Starts or extends the debounce
    /// window; during a run it marks the pending rerun instead.
    fn note_change(&mut self, now: Instant) {
        match &mut self.state {
            SchedulerState::Idle | SchedulerState::Debouncing { .. } => {
                self.state = SchedulerState::Debouncing {
                    deadline: now + self.debounce,
                };
            }
            SchedulerState::Running { pending } => *pending = true,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        match self.state {
            SchedulerState::Debouncing { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Consume an elapsed debounce window, transitioning to Running.
    fn take_due(&mut self, now: Instant) -> bool {
        if matches!(self.state, SchedulerState::Debouncing { deadline } if now >= deadline) {
            self.state = SchedulerState::Running { pending: false };
            return true;
        }
        false
    }

    /// The periodic timer fired. A periodic run subsumes any debounce in
    /// progress; during a run it collapses into the pending flag.
    fn begin_periodic(&mut self) -> bool {
        match &mut self.state {
            SchedulerState::Idle | SchedulerState::Debouncing { .. } => {
                self.state = SchedulerState::Running { pending: false };
                true
            }
            SchedulerState::Running { pending } => {
                *pending = true;
                false
            }
        }
    }

    /// A run finished. Returns whether exactly one rerun is owed.
    fn finish_run(&mut self) -> bool {
        let rerun = matches!(self.state, SchedulerState::Running { pending: true });
        self.state = SchedulerState::Idle;
        rerun
    }

    fn begin_rerun(&mut self) {
        self.state = SchedulerState::Running { pending: false };
    }
}

fn pid_path(state_dir: &Path) -> PathBuf {
    state_dir.join(PID_FILE)
}

fn status_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATUS_FILE)
}

fn write_status(state_dir: &Path, status: &DaemonStatus) {
    let json = match serde_json::to_string_pretty(status) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("failed to serialize daemon status: {}", e);
            return;
        }
    };
    if let Err(e) = std::fs::write(status_path(state_dir), json) {
        tracing::warn!("failed to write daemon status: {}", e);
    }
}

fn init_logging(state_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let appender = tracing_appender::rolling::never(state_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let timer =
        tracing_subscriber::fmt::time::ChronoLocal::new("[%Y-%m-%d %H:%M:%S]".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_timer(timer)
        .with_env_filter(filter)
        .try_init();
    guard
}

fn spawn_run(
    engine: &Arc<SyncEngine>,
    sources_file: &Path,
    git_pull: bool,
) -> JoinHandle<SyncOutcome> {
    let engine = Arc::clone(engine);
    let sources_file = sources_file.to_path_buf();
    tokio::spawn(async move {
        let sync_sources = sources::load_sources(&sources_file).unwrap_or_else(|e| {
            tracing::warn!("failed to load sync sources: {}", e);
            Vec::new()
        });
        let opts = SyncOptions {
            git_pull,
            git_push: true,
            dry_run: false,
        };
        engine.run(&sync_sources, &opts).await
    })
}

fn record_outcome(state_dir: &Path, status: &mut DaemonStatus, outcome: &SyncOutcome) {
    status.last_sync = Some(Utc::now());
    status.last_sync_result = Some(outcome.as_last_sync_result());
    write_status(state_dir, status);

    let result = status.last_sync_result.clone().unwrap_or_default();
    tracing::info!(
        "sync finished: {} scanned, {} processed, {} errors, {} reconciled",
        result.files_scanned,
        result.files_processed,
        result.errors,
        outcome.reconciled
    );
    if let Some(e) = &outcome.git_error {
        tracing::warn!("git error during sync: {}", e);
    }
}

/// Run the daemon in the foreground until SIGTERM/SIGINT.
pub async fn run_daemon(config: &Config, engine: Arc<SyncEngine>) -> Result<()> {
    let state_dir = config.state_dir();
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create state dir {}", state_dir.display()))?;

    // PID file first, so a launcher can confirm liveness immediately.
    let pid_file_path = pid_path(&state_dir);
    let mut pid_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&pid_file_path)
        .with_context(|| format!("Failed to open {}", pid_file_path.display()))?;
    if pid_file.try_lock_exclusive().is_err() {
        bail!("daemon already running ({} is locked)", pid_file_path.display());
    }
    pid_file.set_len(0)?;
    write!(pid_file, "{}", std::process::id())?;
    pid_file.flush()?;

    let _log_guard = init_logging(&state_dir);
    tracing::info!("daemon started (pid {})", std::process::id());

    let mut status = DaemonStatus {
        pid: std::process::id(),
        started_at: Utc::now(),
        last_sync: None,
        last_sync_result: None,
    };
    write_status(&state_dir, &status);

    let sources_file = config.sources_file();

    // One immediate pass, then the two event loops take over.
    match spawn_run(&engine, &sources_file, true).await {
        Ok(outcome) => record_outcome(&state_dir, &mut status, &outcome),
        Err(e) => tracing::error!("initial sync failed: {}", e),
    }

    // Filesystem watchers, one per enabled source directory.
    let (fs_tx, mut fs_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let mut watchers = Vec::new();
    for source in sources::load_sources(&sources_file)
        .unwrap_or_default()
        .iter()
        .filter(|s| s.enabled)
    {
        if !source.path.is_dir() {
            tracing::warn!(
                "source '{}' directory missing, not watching: {}",
                source.name,
                source.path.display()
            );
            continue;
        }
        let tx = fs_tx.clone();
        let watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        let _ = tx.send(());
                    }
                }
            },
        );
        match watcher {
            Ok(mut watcher) => match watcher.watch(&source.path, RecursiveMode::Recursive) {
                Ok(()) => {
                    tracing::info!("watching '{}' at {}", source.name, source.path.display());
                    watchers.push(watcher);
                }
                Err(e) => tracing::warn!("failed to watch {}: {}", source.path.display(), e),
            },
            Err(e) => tracing::warn!("failed to create watcher for '{}': {}", source.name, e),
        }
    }

    let mut scheduler = Scheduler::new(Duration::from_millis(config.daemon.debounce_ms));
    let poll = Duration::from_secs(config.daemon.poll_interval_secs);
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + poll, poll);
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut running: Option<JoinHandle<SyncOutcome>> = None;

    loop {
        let deadline = scheduler.deadline();
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
            Some(()) = fs_rx.recv() => {
                scheduler.note_change(Instant::now());
            }
            _ = interval.tick() => {
                if scheduler.begin_periodic() {
                    tracing::info!("periodic sync (pull enabled)");
                    running = Some(spawn_run(&engine, &sources_file, true));
                }
            }
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(
                deadline.unwrap_or_else(Instant::now),
            )), if deadline.is_some() => {
                if scheduler.take_due(Instant::now()) {
                    tracing::info!("file changes settled, syncing (no pull)");
                    running = Some(spawn_run(&engine, &sources_file, false));
                }
            }
            result = async { running.as_mut().expect("guarded by running.is_some()").await },
                if running.is_some() =>
            {
                running = None;
                match result {
                    Ok(outcome) => record_outcome(&state_dir, &mut status, &outcome),
                    Err(e) => tracing::error!("sync task failed: {}", e),
                }
                if scheduler.finish_run() {
                    scheduler.begin_rerun();
                    tracing::info!("changes arrived during sync, running once more");
                    running = Some(spawn_run(&engine, &sources_file, false));
                }
            }
        }
    }

    // Let an in-flight run finish; its side effects are file-scoped.
    if let Some(handle) = running {
        match handle.await {
            Ok(outcome) => record_outcome(&state_dir, &mut status, &outcome),
            Err(e) => tracing::error!("sync task failed during shutdown: {}", e),
        }
    }

    drop(watchers);
    let _ = std::fs::remove_file(&pid_file_path);
    tracing::info!("daemon stopped");
    Ok(())
}

/// Liveness check. A stale PID file (lock acquirable) is removed and
/// reported as not running.
pub fn daemon_status(state_dir: &Path) -> Result<Option<DaemonStatus>> {
    let pid_file_path = pid_path(state_dir);
    if !pid_file_path.exists() {
        return Ok(None);
    }
    let file = File::open(&pid_file_path)?;
    if file.try_lock_exclusive().is_ok() {
        let _ = FileExt::unlock(&file);
        drop(file);
        let _ = std::fs::remove_file(&pid_file_path);
        let _ = std::fs::remove_file(status_path(state_dir));
        return Ok(None);
    }

    let content = std::fs::read_to_string(status_path(state_dir)).unwrap_or_default();
    if let Ok(status) = serde_json::from_str::<DaemonStatus>(&content) {
        return Ok(Some(status));
    }
    let pid = std::fs::read_to_string(&pid_file_path)?
        .trim()
        .parse::<u32>()
        .context("unparseable pid file")?;
    Ok(Some(DaemonStatus {
        pid,
        started_at: Utc::now(),
        last_sync: None,
        last_sync_result: None,
    }))
}

/// Signal the running daemon and wait for it to exit.
pub fn stop_daemon(state_dir: &Path) -> Result<bool> {
    let Some(status) = daemon_status(state_dir)? else {
        return Ok(false);
    };

    // SAFETY: plain signal send; the pid came from our own status file.
    unsafe {
        libc::kill(status.pid as libc::pid_t, libc::SIGTERM);
    }

    let pid_file_path = pid_path(state_dir);
    for _ in 0..100 {
        std::thread::sleep(Duration::from_millis(100));
        if !pid_file_path.exists() {
            return Ok(true);
        }
        if let Ok(file) = File::open(&pid_file_path) {
            if file.try_lock_exclusive().is_ok() {
                let _ = FileExt::unlock(&file);
                return Ok(true);
            }
        }
    }
    bail!("daemon (pid {}) did not exit within 10s", status.pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_of_changes_coalesces_into_one_run() {
        let debounce = Duration::from_millis(100);
        let mut scheduler = Scheduler::new(debounce);
        let start = Instant::now();

        for i in 0..10 {
            scheduler.note_change(start + Duration::from_millis(i));
        }
        // Not yet due inside the window.
        assert!(!scheduler.take_due(start + Duration::from_millis(50)));
        // Due exactly once after the window elapses.
        assert!(scheduler.take_due(start + Duration::from_millis(250)));
        assert!(!scheduler.take_due(start + Duration::from_millis(300)));
    }

    #[test]
    fn changes_during_run_queue_exactly_one_rerun() {
        let mut scheduler = Scheduler::new(Duration::from_millis(100));
        let start = Instant::now();

        scheduler.note_change(start);
        assert!(scheduler.take_due(start + Duration::from_millis(200)));

        // Many triggers while running collapse into one pending flag.
        for _ in 0..5 {
            scheduler.note_change(Instant::now());
        }
        assert!(scheduler.finish_run());

        scheduler.begin_rerun();
        assert!(!scheduler.finish_run());
    }

    #[test]
    fn periodic_timer_defers_while_running() {
        let mut scheduler = Scheduler::new(Duration::from_millis(100));
        assert!(scheduler.begin_periodic());
        assert!(!scheduler.begin_periodic());
        assert!(scheduler.finish_run());
    }

    #[test]
    fn periodic_timer_subsumes_debounce() {
        let mut scheduler = Scheduler::new(Duration::from_millis(100));
        scheduler.note_change(Instant::now());
        assert!(scheduler.begin_periodic());
        assert_eq!(scheduler.deadline(), None);
    }
}
