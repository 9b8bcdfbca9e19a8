//! Low-level worktree operations for task isolation.
//!
//! Each isolated task gets a dedicated branch under the `muster/` prefix
//! and a worktree checked out from the current HEAD. The prefix makes
//! orphans from a crashed prior run identifiable at startup.

use crate::error::{MusterError, Result};
use crate::git::run_git;
use std::path::{Path, PathBuf};

/// Branch namespace for isolation branches.
pub const ISOLATION_BRANCH_PREFIX: &str = "muster/";

/// Conventional branch name for a task's isolation.
pub fn isolation_branch(task_id: &str) -> String {
    format!("{}{}", ISOLATION_BRANCH_PREFIX, task_id)
}

/// One entry from `git worktree list --porcelain`.
#[derive(Debug, Clone)]
pub struct WorktreeEntry {
    /// Absolute path to the worktree.
    pub path: PathBuf,
    /// Branch the worktree is on, if not detached.
    pub branch: Option<String>,
}

/// List all worktrees registered in the repository.
pub fn list_worktrees<P: AsRef<Path>>(repo_root: P) -> Result<Vec<WorktreeEntry>> {
    let output = run_git(repo_root, &["worktree", "list", "--porcelain"])?;

    let mut worktrees = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_branch: Option<String> = None;

    for line in output.stdout.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(path) = current_path.take() {
                worktrees.push(WorktreeEntry {
                    path,
                    branch: current_branch.take(),
                });
            }
            current_path = Some(PathBuf::from(path));
        } else if let Some(branch_ref) = line.strip_prefix("branch ") {
            current_branch = branch_ref.strip_prefix("refs/heads/").map(String::from);
        } else if line == "detached" {
            current_branch = None;
        }
    }

    if let Some(path) = current_path {
        worktrees.push(WorktreeEntry {
            path,
            branch: current_branch,
        });
    }

    Ok(worktrees)
}

/// Create a worktree on a fresh branch at the current HEAD.
pub fn add_worktree<P: AsRef<Path>>(repo_root: P, path: &Path, branch: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            MusterError::Isolation(format!(
                "failed to create worktrees directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let path_str = path.to_string_lossy();
    run_git(
        repo_root,
        &["worktree", "add", &path_str, "-b", branch, "HEAD"],
    )
    .map_err(|e| {
        MusterError::Isolation(format!(
            "failed to create worktree at '{}' for branch '{}': {}",
            path_str, branch, e
        ))
    })?;

    Ok(())
}

/// Remove a worktree, reclaiming disk space even if the task left
/// uncommitted changes behind.
pub fn remove_worktree<P: AsRef<Path>>(repo_root: P, path: &Path) -> Result<()> {
    let repo_root = repo_root.as_ref();
    let path_str = path.to_string_lossy();

    if run_git(repo_root, &["worktree", "remove", "--force", &path_str]).is_err() {
        // The registration may already be gone while the directory
        // lingers (or vice versa). Clear both sides.
        if path.exists() {
            std::fs::remove_dir_all(path).map_err(|e| {
                MusterError::Isolation(format!(
                    "failed to remove worktree directory '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        run_git(repo_root, &["worktree", "prune"])?;
    }

    Ok(())
}

/// Check if a branch exists locally.
pub fn branch_exists<P: AsRef<Path>>(repo_root: P, branch: &str) -> Result<bool> {
    let output = run_git(
        repo_root,
        &["rev-parse", "--verify", &format!("refs/heads/{}", branch)],
    );
    Ok(output.is_ok())
}

/// Force-delete a branch. Isolation branches carry no durable work.
pub fn delete_branch<P: AsRef<Path>>(repo_root: P, branch: &str) -> Result<()> {
    run_git(repo_root, &["branch", "-D", branch]).map_err(|e| {
        MusterError::Isolation(format!("failed to delete branch '{}': {}", branch, e))
    })?;
    Ok(())
}

/// List local branches under the isolation prefix.
pub fn list_isolation_branches<P: AsRef<Path>>(repo_root: P) -> Result<Vec<String>> {
    let pattern = format!("{}*", ISOLATION_BRANCH_PREFIX);
    let output = run_git(
        repo_root,
        &["branch", "--list", &pattern, "--format", "%(refname:short)"],
    )?;
    Ok(output.lines().iter().map(|s| s.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_repo;

    #[test]
    fn test_isolation_branch_name() {
        assert_eq!(isolation_branch("task-000001"), "muster/task-000001");
    }

    #[test]
    fn test_add_list_remove_worktree() {
        let temp_dir = create_test_repo();
        let repo = temp_dir.path();
        let path = repo.join(".worktrees").join("task-000001");
        let branch = isolation_branch("task-000001");

        add_worktree(repo, &path, &branch).unwrap();
        assert!(path.exists());
        assert!(branch_exists(repo, &branch).unwrap());

        let entries = list_worktrees(repo).unwrap();
        assert!(
            entries
                .iter()
                .any(|e| e.branch.as_deref() == Some(branch.as_str()))
        );

        remove_worktree(repo, &path).unwrap();
        assert!(!path.exists());

        delete_branch(repo, &branch).unwrap();
        assert!(!branch_exists(repo, &branch).unwrap());
    }

    #[test]
    fn test_remove_worktree_with_uncommitted_changes() {
        let temp_dir = create_test_repo();
        let repo = temp_dir.path();
        let path = repo.join(".worktrees").join("task-000002");
        let branch = isolation_branch("task-000002");

        add_worktree(repo, &path, &branch).unwrap();
        std::fs::write(path.join("dirty.txt"), "uncommitted\n").unwrap();

        // Disk space is reclaimed even for a dirty worktree.
        remove_worktree(repo, &path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_unregistered_directory() {
        let temp_dir = create_test_repo();
        let repo = temp_dir.path();
        let path = repo.join(".worktrees").join("leftover");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("junk.txt"), "junk\n").unwrap();

        remove_worktree(repo, &path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_list_isolation_branches() {
        let temp_dir = create_test_repo();
        let repo = temp_dir.path();

        let path = repo.join(".worktrees").join("task-000003");
        add_worktree(repo, &path, &isolation_branch("task-000003")).unwrap();

        let branches = list_isolation_branches(repo).unwrap();
        assert_eq!(branches, vec!["muster/task-000003".to_string()]);
    }
}
