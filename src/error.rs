//! Error types for the muster core.
//!
//! Uses thiserror for derive macros. The taxonomy follows the recovery policy
//! of each failure class: discovery-time errors are recovered locally
//! (skip-and-log), dispatch-time errors surface per-task, and only an
//! unreadable hierarchy is fatal at startup.

use crate::exit_codes;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for muster operations.
#[derive(Error, Debug)]
pub enum MusterError {
    /// A definition file could not be parsed. The file is skipped during
    /// discovery; a previously accepted version is retained if one exists.
    #[error("failed to parse definition '{path}': {reason}")]
    Parse {
        /// Path of the offending definition file.
        path: PathBuf,
        /// Human-readable parse failure reason.
        reason: String,
    },

    /// No agent matched the requested name or capability query.
    /// Surfaced to the caller, never retried automatically.
    #[error("no agent matches '{0}'")]
    NotFound(String),

    /// Two definitions at the same tier share a name.
    #[error("conflicting definitions: {0}")]
    Conflict(String),

    /// An isolated working copy could not be acquired or released.
    #[error("isolation failure: {0}")]
    Isolation(String),

    /// A task or collaborator call exceeded its execution budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The knowledge store is unreachable. Non-fatal: context bundles are
    /// produced in degraded form instead.
    #[error("knowledge store unavailable: {0}")]
    BackendUnavailable(String),

    /// Invalid configuration or invalid system state.
    #[error("{0}")]
    Config(String),

    /// Git operation failed.
    #[error("git operation failed: {0}")]
    Git(String),
}

impl MusterError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            MusterError::Parse { .. } | MusterError::Config(_) => exit_codes::CONFIG_ERROR,
            MusterError::NotFound(_) => exit_codes::NOT_FOUND,
            MusterError::Conflict(_) => exit_codes::CONFLICT,
            MusterError::Git(_) | MusterError::Isolation(_) => exit_codes::GIT_FAILURE,
            MusterError::Timeout(_) | MusterError::BackendUnavailable(_) => {
                exit_codes::TASK_FAILURE
            }
        }
    }
}

/// Result type alias for muster operations.
pub type Result<T> = std::result::Result<T, MusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_has_config_exit_code() {
        let err = MusterError::Parse {
            path: PathBuf::from("agents/qa.yaml"),
            reason: "missing name".to_string(),
        };
        assert_eq!(err.exit_code(), exit_codes::CONFIG_ERROR);
    }

    #[test]
    fn not_found_has_correct_exit_code() {
        let err = MusterError::NotFound("qa-agent".to_string());
        assert_eq!(err.exit_code(), exit_codes::NOT_FOUND);
    }

    #[test]
    fn git_and_isolation_share_exit_code() {
        let git = MusterError::Git("worktree add failed".to_string());
        let iso = MusterError::Isolation("no free slot".to_string());
        assert_eq!(git.exit_code(), exit_codes::GIT_FAILURE);
        assert_eq!(iso.exit_code(), exit_codes::GIT_FAILURE);
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = MusterError::Parse {
            path: PathBuf::from("agents/qa.yaml"),
            reason: "missing required field 'name'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to parse definition 'agents/qa.yaml': missing required field 'name'"
        );

        let err = MusterError::Timeout("task-000001 exceeded 600s".to_string());
        assert_eq!(err.to_string(), "timed out: task-000001 exceeded 600s");
    }

    #[test]
    fn conflict_has_dedicated_exit_code() {
        let err = MusterError::Conflict("duplicate 'qa-agent' at project tier".to_string());
        assert_eq!(err.exit_code(), exit_codes::CONFLICT);
    }
}
