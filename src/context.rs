//! Workspace path resolution for muster.
//!
//! Finds the git repository root from any working directory and resolves the
//! canonical state paths: the `.muster/` state directory, the project-tier
//! agents directory, backup and event storage, and the worktrees directory
//! used for task isolation.

use crate::error::{MusterError, Result};
use crate::git;
use std::env;
use std::path::{Path, PathBuf};

/// Default state directory relative to repo root.
pub const DEFAULT_STATE_DIR: &str = ".muster";

/// Default task worktrees directory relative to repo root.
pub const DEFAULT_WORKTREES_DIR: &str = ".worktrees";

/// Resolved paths for the muster core.
///
/// All paths are absolute.
#[derive(Debug, Clone)]
pub struct CoreContext {
    /// Absolute path to the repository root.
    pub repo_root: PathBuf,

    /// Absolute path to the state directory (default: `{repo_root}/.muster/`).
    pub state_dir: PathBuf,

    /// Absolute path to the project-tier agents directory
    /// (default: `{repo_root}/.muster/agents/`).
    pub agents_dir: PathBuf,

    /// Absolute path to the backups directory for replaced definitions.
    pub backups_dir: PathBuf,

    /// Absolute path to the task worktrees directory.
    pub worktrees_dir: PathBuf,
}

impl CoreContext {
    /// Resolve the core context from the current working directory.
    pub fn resolve() -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| {
            MusterError::Config(format!("failed to get current working directory: {}", e))
        })?;

        Self::resolve_from(&cwd)
    }

    /// Resolve the core context from a specific directory.
    ///
    /// Useful for testing or when the working directory is known.
    pub fn resolve_from<P: AsRef<Path>>(cwd: P) -> Result<Self> {
        let repo_root = git::get_repo_root(cwd.as_ref())?;

        let state_dir = repo_root.join(DEFAULT_STATE_DIR);
        let agents_dir = state_dir.join("agents");
        let backups_dir = state_dir.join("backups");
        let worktrees_dir = repo_root.join(DEFAULT_WORKTREES_DIR);

        Ok(Self {
            repo_root,
            state_dir,
            agents_dir,
            backups_dir,
            worktrees_dir,
        })
    }

    /// Check if the state directory has been initialized.
    pub fn initialized(&self) -> bool {
        self.state_dir.exists() && self.agents_dir.exists()
    }

    /// Ensure the state directory is initialized, returning an error if not.
    pub fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized() {
            return Err(MusterError::Config(format!(
                "muster is not initialized.\n\
                 Expected agents directory at: {}\n\n\
                 Run `muster init` to initialize this repository.",
                self.agents_dir.display()
            )));
        }
        Ok(())
    }

    /// Get the path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.yaml")
    }

    /// Get the path to the events directory.
    pub fn events_dir(&self) -> PathBuf {
        self.state_dir.join("events")
    }

    /// Get the path to the main events log file.
    pub fn events_file(&self) -> PathBuf {
        self.events_dir().join("events.ndjson")
    }

    /// Get the per-task log directory (briefing, stdout, stderr).
    pub fn task_logs_dir(&self, task_id: &str) -> PathBuf {
        self.state_dir.join("logs").join(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_repo;

    #[test]
    fn test_resolve_from_repo_root() {
        let temp_dir = create_test_repo();
        let ctx = CoreContext::resolve_from(temp_dir.path()).unwrap();

        let expected_root = temp_dir.path().canonicalize().unwrap();
        assert_eq!(ctx.repo_root.canonicalize().unwrap(), expected_root);

        assert!(ctx.state_dir.ends_with(".muster"));
        assert!(ctx.agents_dir.ends_with("agents"));
        assert!(ctx.worktrees_dir.ends_with(".worktrees"));
    }

    #[test]
    fn test_resolve_from_subdirectory() {
        let temp_dir = create_test_repo();
        let subdir = temp_dir.path().join("src").join("nested");
        std::fs::create_dir_all(&subdir).unwrap();

        let ctx = CoreContext::resolve_from(&subdir).unwrap();
        let expected_root = temp_dir.path().canonicalize().unwrap();
        assert_eq!(ctx.repo_root.canonicalize().unwrap(), expected_root);
    }

    #[test]
    fn test_not_initialized_by_default() {
        let temp_dir = create_test_repo();
        let ctx = CoreContext::resolve_from(temp_dir.path()).unwrap();

        assert!(!ctx.initialized());
        let err = ctx.ensure_initialized().unwrap_err();
        assert!(err.to_string().contains("muster init"));
    }

    #[test]
    fn test_initialized_when_agents_dir_exists() {
        let temp_dir = create_test_repo();
        let ctx = CoreContext::resolve_from(temp_dir.path()).unwrap();

        std::fs::create_dir_all(&ctx.agents_dir).unwrap();
        assert!(ctx.initialized());
        assert!(ctx.ensure_initialized().is_ok());
    }

    #[test]
    fn test_derived_paths() {
        let temp_dir = create_test_repo();
        let ctx = CoreContext::resolve_from(temp_dir.path()).unwrap();

        assert!(ctx.config_path().ends_with("config.yaml"));
        assert!(ctx.events_file().ends_with("events.ndjson"));
        assert!(
            ctx.task_logs_dir("task-000001")
                .ends_with("logs/task-000001")
        );
    }
}
