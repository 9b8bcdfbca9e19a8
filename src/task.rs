//! Task request and execution model.
//!
//! A [`TaskRequest`] describes one unit of work to dispatch; a
//! [`TaskExecution`] is the record of one in-flight or completed dispatch.
//! Executions move through `Queued -> Running -> Succeeded | Failed |
//! Cancelled`; a timeout surfaces as `Failed` with a timeout failure
//! reason. Exactly one isolation handle belongs to each execution and is
//! released exactly once on every terminal path.

use crate::definition::AgentDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Urgent work.
    High,
    /// Normal work.
    #[default]
    Medium,
    /// Background work.
    Low,
}

/// A request to dispatch one task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TaskRequest {
    /// What should be done.
    pub description: String,

    /// Explicit target agent name. When unset, `capability` (or the
    /// description) is used as a capability query instead.
    pub agent: Option<String>,

    /// Capability query used when no explicit agent name is given.
    pub capability: Option<String>,

    /// Structured requirements.
    pub requirements: Vec<String>,

    /// Expected deliverables.
    pub deliverables: Vec<String>,

    /// Priority of the request.
    pub priority: Priority,

    /// Optional per-task timeout override in seconds.
    pub timeout_seconds: Option<u64>,
}

impl TaskRequest {
    /// Create a request for an explicitly named agent.
    pub fn for_agent(agent: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            agent: Some(agent.into()),
            ..Self::default()
        }
    }

    /// Create a request resolved by capability query.
    pub fn for_capability(capability: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            capability: Some(capability.into()),
            ..Self::default()
        }
    }

    /// The capability query to run when no explicit agent is named.
    pub fn capability_query(&self) -> &str {
        self.capability.as_deref().unwrap_or(&self.description)
    }
}

/// Status of a task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, waiting for a worker.
    Queued,
    /// Currently executing.
    Running,
    /// Completed with a successful exit.
    Succeeded,
    /// Completed unsuccessfully (including timeouts).
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl TaskStatus {
    /// Whether this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Captured output of one agent process run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Exit code of the process (None if killed).
    pub exit_code: Option<i32>,
    /// Path to the stdout log file.
    pub stdout_path: PathBuf,
    /// Path to the stderr log file.
    pub stderr_path: PathBuf,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Whether the process was killed on timeout.
    pub timed_out: bool,
    /// The rendered command that was executed.
    pub command: String,
}

impl ExecutionResult {
    /// Whether the run completed successfully.
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// One in-flight or completed dispatch.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    /// Unique execution id (e.g. "task-000001").
    pub id: String,
    /// The originating request.
    pub request: TaskRequest,
    /// The resolved agent definition, once resolution succeeded.
    pub agent: Option<Arc<AgentDefinition>>,
    /// The isolated working path, while held.
    pub isolation_path: Option<PathBuf>,
    /// When the execution was accepted.
    pub queued_at: DateTime<Utc>,
    /// When the execution started running.
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: TaskStatus,
    /// Process output, when the agent ran.
    pub result: Option<ExecutionResult>,
    /// Failure reason, when the execution failed.
    pub failure: Option<String>,
}

impl TaskExecution {
    /// Create a freshly queued execution record.
    pub fn queued(id: impl Into<String>, request: TaskRequest) -> Self {
        Self {
            id: id.into(),
            request,
            agent: None,
            isolation_path: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            status: TaskStatus::Queued,
            result: None,
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_capability_query_falls_back_to_description() {
        let request = TaskRequest::for_capability("test_execution", "run the suite");
        assert_eq!(request.capability_query(), "test_execution");

        let request = TaskRequest {
            description: "run the suite".to_string(),
            ..TaskRequest::default()
        };
        assert_eq!(request.capability_query(), "run the suite");
    }

    #[test]
    fn test_execution_result_success() {
        let result = ExecutionResult {
            exit_code: Some(0),
            stdout_path: PathBuf::from("stdout.log"),
            stderr_path: PathBuf::from("stderr.log"),
            duration: Duration::from_secs(1),
            timed_out: false,
            command: "echo ok".to_string(),
        };
        assert!(result.is_success());

        let failed = ExecutionResult {
            exit_code: Some(1),
            ..result.clone()
        };
        assert!(!failed.is_success());

        let timed_out = ExecutionResult {
            timed_out: true,
            ..result
        };
        assert!(!timed_out.is_success());
    }

    #[test]
    fn test_queued_execution_shape() {
        let execution =
            TaskExecution::queued("task-000001", TaskRequest::for_agent("qa-agent", "run"));
        assert_eq!(execution.status, TaskStatus::Queued);
        assert!(execution.agent.is_none());
        assert!(execution.isolation_path.is_none());
        assert!(execution.started_at.is_none());
    }
}
