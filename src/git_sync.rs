//! Git synchronization of the data directory.
//!
//! Wraps subprocess `git` with the two entry points a sync run needs:
//! [`pull`] (stash-protected merge pull) and [`commit_and_push`] (stage,
//! commit, push, including any backlog of unpushed commits from prior
//! runs). Both recover first from a stuck rebase left behind by a killed
//! process, and both are idempotent: with nothing to do they return a
//! descriptive no-op, never an error.
//!
//! The pull uses merge rather than rebase on purpose: an interrupted
//! rebase is exactly the stuck state being guarded against.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;

const AUTOSTASH_LABEL: &str = "lorebase-autostash";

#[derive(Debug)]
pub struct PullOutcome {
    pub pulled: bool,
    pub message: String,
}

#[derive(Debug)]
pub struct PushOutcome {
    pub committed: bool,
    pub pushed: bool,
    pub message: String,
}

/// Run git with `args` in `repo`, returning (success, stdout, stderr).
fn git(repo: &Path, args: &[&str]) -> Result<(bool, String, String)> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .env("GIT_EDITOR", "true")
        .output()
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args.join(" ")))?;
    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
        String::from_utf8_lossy(&output.stderr).trim().to_string(),
    ))
}

pub fn is_git_repo(dir: &Path) -> bool {
    dir.join(".git").exists()
}

fn has_remote(repo: &Path, remote: &str) -> bool {
    match git(repo, &["remote"]) {
        Ok((true, stdout, _)) => stdout.lines().any(|line| line.trim() == remote),
        _ => false,
    }
}

fn is_dirty(repo: &Path) -> Result<bool> {
    let (ok, stdout, stderr) = git(repo, &["status", "--porcelain"])?;
    if !ok {
        bail!("git status failed: {}", stderr);
    }
    Ok(!stdout.is_empty())
}

fn rebase_state_dirs(repo: &Path) -> Vec<std::path::PathBuf> {
    ["rebase-merge", "rebase-apply"]
        .iter()
        .map(|d| repo.join(".git").join(d))
        .filter(|p| p.exists())
        .collect()
}

/// Recover from rebase state left over by a previously killed process.
///
/// With a clean tree, `rebase --continue` is attempted first; otherwise
/// (or when it fails) `rebase --abort`. If git itself refuses both, the
/// leftover state directories are removed so the repository is usable
/// again.
pub fn recover_stuck_rebase(repo: &Path) -> Result<()> {
    let leftover = rebase_state_dirs(repo);
    if leftover.is_empty() {
        return Ok(());
    }
    tracing::warn!("stuck rebase detected in {}, recovering", repo.display());

    if !is_dirty(repo)? {
        let (ok, _, _) = git(repo, &["rebase", "--continue"])?;
        if ok && rebase_state_dirs(repo).is_empty() {
            tracing::info!("stuck rebase completed via --continue");
            return Ok(());
        }
    }

    let (ok, _, stderr) = git(repo, &["rebase", "--abort"])?;
    if ok && rebase_state_dirs(repo).is_empty() {
        tracing::info!("stuck rebase rolled back via --abort");
        return Ok(());
    }
    tracing::warn!("rebase --abort did not clear state ({}), removing leftovers", stderr);

    for dir in rebase_state_dirs(repo) {
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to remove rebase state {}", dir.display()))?;
    }
    Ok(())
}

/// Pull the latest remote state, preserving uncommitted local changes via
/// a stash around the merge. A stash-pop conflict is logged but does not
/// fail the pull; the content stays recoverable in the stash list.
pub fn pull(repo: &Path, remote: &str) -> Result<PullOutcome> {
    if !is_git_repo(repo) {
        return Ok(PullOutcome {
            pulled: false,
            message: "not a git repository; skipping pull".to_string(),
        });
    }
    if !has_remote(repo, remote) {
        return Ok(PullOutcome {
            pulled: false,
            message: format!("no '{}' remote configured; skipping pull", remote),
        });
    }

    recover_stuck_rebase(repo)?;

    let mut stashed = false;
    if is_dirty(repo)? {
        let (ok, _, stderr) = git(repo, &["stash", "push", "-u", "-m", AUTOSTASH_LABEL])?;
        if !ok {
            bail!("failed to stash local changes before pull: {}", stderr);
        }
        stashed = true;
    }

    let (ok, _, stderr) = git(repo, &["pull", "--no-rebase", remote])?;
    if !ok {
        if stashed {
            let _ = git(repo, &["stash", "pop"]);
        }
        bail!("git pull failed: {}", stderr);
    }

    let mut message = "pulled latest changes".to_string();
    if stashed {
        let (ok, _, stderr) = git(repo, &["stash", "pop"])?;
        if !ok {
            tracing::warn!(
                "stash pop conflicted after pull; local changes kept in stash list: {}",
                stderr
            );
            message = "pulled; local changes left in stash after pop conflict".to_string();
        }
    }

    Ok(PullOutcome {
        pulled: true,
        message,
    })
}

/// True when commits exist that the upstream has not seen. A missing
/// upstream counts as a backlog so the first push still happens.
fn has_unpushed_commits(repo: &Path) -> bool {
    match git(repo, &["log", "@{u}..HEAD", "--oneline"]) {
        Ok((true, stdout, _)) => !stdout.is_empty(),
        // No upstream configured yet.
        _ => true,
    }
}

/// Stage and commit any local changes, then push. The push runs even when
/// this call committed nothing, so a prior run's unpushed commit gets
/// flushed. A push failure is reported in the outcome, not as an error;
/// the local commit already succeeded and the next cycle retries.
pub fn commit_and_push(repo: &Path, remote: &str, message: &str) -> Result<PushOutcome> {
    if !is_git_repo(repo) {
        return Ok(PushOutcome {
            committed: false,
            pushed: false,
            message: "not a git repository; skipping commit".to_string(),
        });
    }

    recover_stuck_rebase(repo)?;

    let mut committed = false;
    if is_dirty(repo)? {
        let (ok, _, stderr) = git(repo, &["add", "-A"])?;
        if !ok {
            bail!("git add failed: {}", stderr);
        }
        let (ok, _, stderr) = git(repo, &["commit", "-m", message])?;
        if !ok {
            bail!("git commit failed: {}", stderr);
        }
        committed = true;
    }

    let mut pushed = false;
    let mut note = if committed {
        "committed local changes".to_string()
    } else {
        "nothing to commit".to_string()
    };

    if has_remote(repo, remote) && (committed || has_unpushed_commits(repo)) {
        let (ok, _, stderr) = git(repo, &["push", remote, "HEAD"])?;
        if ok {
            pushed = true;
            note.push_str("; pushed");
        } else {
            tracing::warn!("git push failed (will retry next cycle): {}", stderr);
            note.push_str("; push failed, will retry next cycle");
        }
    }

    Ok(PushOutcome {
        committed,
        pushed,
        message: note,
    })
}
