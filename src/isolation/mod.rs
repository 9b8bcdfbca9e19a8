//! Per-task isolation manager.
//!
//! Each concurrent task receives a private working path that shares no
//! mutable file with any other concurrently acquired path, implemented as
//! a git worktree on a dedicated branch. `release` is idempotent and
//! always reclaims disk space even when the task failed; orphaned
//! isolations from a crashed prior run are detected by their branch
//! prefix and pruned at orchestrator startup.

pub mod worktree;

use crate::error::{MusterError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use worktree::{
    ISOLATION_BRANCH_PREFIX, add_worktree, branch_exists, delete_branch, isolation_branch,
    list_isolation_branches, list_worktrees, remove_worktree,
};

/// Creates and tears down isolated working copies for tasks.
pub struct IsolationManager {
    repo_root: PathBuf,
    worktrees_dir: PathBuf,
    active: Mutex<HashMap<String, PathBuf>>,
    retries: u32,
    backoff: Duration,
}

impl IsolationManager {
    /// Create a manager rooted at the given repository.
    pub fn new(
        repo_root: impl Into<PathBuf>,
        worktrees_dir: impl Into<PathBuf>,
        retries: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            worktrees_dir: worktrees_dir.into(),
            active: Mutex::new(HashMap::new()),
            retries,
            backoff,
        }
    }

    /// Acquire an isolated working path for a task.
    ///
    /// Retries a bounded number of times with backoff before surfacing an
    /// [`MusterError::Isolation`]. Acquiring the same task id twice
    /// without a release in between is an error: each execution holds
    /// exactly one handle.
    pub fn acquire(&self, task_id: &str) -> Result<PathBuf> {
        {
            let active = self.active.lock();
            if active.contains_key(task_id) {
                return Err(MusterError::Isolation(format!(
                    "task '{}' already holds an isolation handle",
                    task_id
                )));
            }
        }

        let path = self.worktrees_dir.join(task_id);
        let branch = isolation_branch(task_id);

        let mut last_error = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                std::thread::sleep(self.backoff * attempt);
                // Clear any partial state the failed attempt left behind.
                self.teardown(task_id, &path, &branch);
            }

            match add_worktree(&self.repo_root, &path, &branch) {
                Ok(()) => {
                    self.active.lock().insert(task_id.to_string(), path.clone());
                    return Ok(path);
                }
                Err(err) => {
                    warn!(task = %task_id, attempt, error = %err, "isolation acquisition failed");
                    last_error = Some(err);
                }
            }
        }

        Err(MusterError::Isolation(format!(
            "failed to acquire isolation for '{}' after {} attempts: {}",
            task_id,
            self.retries + 1,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Release a task's isolation. Idempotent: releasing an unknown or
    /// already-released task id succeeds and still sweeps any leftover
    /// on-disk state for that id.
    pub fn release(&self, task_id: &str) -> Result<()> {
        let path = self
            .active
            .lock()
            .remove(task_id)
            .unwrap_or_else(|| self.worktrees_dir.join(task_id));
        let branch = isolation_branch(task_id);

        self.teardown(task_id, &path, &branch);
        Ok(())
    }

    /// Best-effort removal of the worktree and branch for one task.
    fn teardown(&self, task_id: &str, path: &Path, branch: &str) {
        if let Err(err) = remove_worktree(&self.repo_root, path) {
            warn!(task = %task_id, error = %err, "worktree removal failed");
        }
        match branch_exists(&self.repo_root, branch) {
            Ok(true) => {
                if let Err(err) = delete_branch(&self.repo_root, branch) {
                    warn!(task = %task_id, error = %err, "branch removal failed");
                }
            }
            Ok(false) => {}
            Err(err) => warn!(task = %task_id, error = %err, "branch lookup failed"),
        }
    }

    /// Detect and remove isolations left behind by a crashed prior run.
    ///
    /// An orphan is any worktree or branch under the isolation prefix
    /// that belongs to no currently active task. Returns the number of
    /// orphans removed.
    pub fn prune_orphans(&self) -> Result<usize> {
        let active: Vec<String> = self.active.lock().keys().cloned().collect();
        let mut pruned = 0;

        for entry in list_worktrees(&self.repo_root)? {
            let Some(branch) = &entry.branch else { continue };
            let Some(task_id) = branch.strip_prefix(ISOLATION_BRANCH_PREFIX) else {
                continue;
            };
            if active.iter().any(|a| a == task_id) {
                continue;
            }

            info!(task = %task_id, path = %entry.path.display(), "pruning orphaned isolation");
            self.teardown(task_id, &entry.path, branch);
            pruned += 1;
        }

        // Branches can orphan without a registered worktree (e.g. a crash
        // between worktree removal and branch deletion).
        for branch in list_isolation_branches(&self.repo_root)? {
            let Some(task_id) = branch.strip_prefix(ISOLATION_BRANCH_PREFIX) else {
                continue;
            };
            if active.iter().any(|a| a == task_id) {
                continue;
            }
            if branch_exists(&self.repo_root, &branch)? {
                info!(branch = %branch, "pruning orphaned isolation branch");
                let _ = delete_branch(&self.repo_root, &branch);
                pruned += 1;
            }
        }

        // Unregistered leftover directories in the worktrees dir.
        if self.worktrees_dir.exists() {
            let registered: Vec<PathBuf> = list_worktrees(&self.repo_root)?
                .into_iter()
                .map(|e| e.path)
                .collect();
            let entries = std::fs::read_dir(&self.worktrees_dir).map_err(|e| {
                MusterError::Isolation(format!(
                    "failed to read worktrees directory '{}': {}",
                    self.worktrees_dir.display(),
                    e
                ))
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                let task_id = entry.file_name().to_string_lossy().to_string();
                if active.iter().any(|a| *a == task_id) {
                    continue;
                }
                let is_registered = registered.iter().any(|r| {
                    r == &path
                        || r.canonicalize().ok() == path.canonicalize().ok()
                });
                if !is_registered && path.is_dir() {
                    info!(path = %path.display(), "removing unregistered leftover isolation");
                    let _ = std::fs::remove_dir_all(&path);
                    pruned += 1;
                }
            }
        }

        Ok(pruned)
    }

    /// Number of currently held isolation handles.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}
