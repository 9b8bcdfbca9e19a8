//! Append-only audit log for registry and orchestration lifecycle events.
//!
//! Events are stored in NDJSON format (one JSON object per line), by
//! default in `.muster/events/events.ndjson`. Each event carries an
//! RFC3339 timestamp, the action, the actor (`user@host`), an optional
//! task id, and a freeform details object.

use crate::error::{MusterError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Actions that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// A full discovery pass completed.
    Discover,
    /// A definition was discovered or updated by the watcher.
    AgentUpdated,
    /// A definition was removed.
    AgentRemoved,
    /// A replaced definition version was backed up.
    Backup,
    /// A task was dispatched to an agent.
    Dispatch,
    /// A task reached a terminal state.
    Complete,
    /// A task was cancelled.
    Cancel,
    /// Orphaned isolations were pruned.
    Prune,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventAction::Discover => "discover",
            EventAction::AgentUpdated => "agent_updated",
            EventAction::AgentRemoved => "agent_removed",
            EventAction::Backup => "backup",
            EventAction::Dispatch => "dispatch",
            EventAction::Complete => "complete",
            EventAction::Cancel => "cancel",
            EventAction::Prune => "prune",
        };
        f.write_str(s)
    }
}

/// An event record for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// RFC3339 timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    /// The action that was performed.
    pub action: EventAction,

    /// The actor who performed the action (e.g. `user@host`).
    pub actor: String,

    /// Optional task id for task-specific events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// Freeform details object with action-specific information.
    pub details: Value,
}

impl Event {
    /// Create a new event with the given action.
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: actor_string(),
            task: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the task id for this event.
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task = Some(task_id.into());
        self
    }

    /// Set the details object for this event.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| MusterError::Config(format!("failed to serialize event: {}", e)))
    }
}

fn actor_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}

/// Append-only NDJSON event log.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Create a log writing to the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append an event as one NDJSON line, creating the file and parent
    /// directories on first use.
    pub fn append(&self, event: &Event) -> Result<()> {
        let json_line = event.to_ndjson_line()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                MusterError::Config(format!(
                    "failed to create events directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                MusterError::Config(format!(
                    "failed to open events file '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;

        writeln!(file, "{}", json_line).map_err(|e| {
            MusterError::Config(format!(
                "failed to write event to '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Append an event, logging failures instead of propagating them.
    /// Audit logging must never break discovery or dispatch.
    pub fn append_best_effort(&self, event: &Event) {
        if let Err(err) = self.append(event) {
            tracing::warn!(error = %err, "failed to append audit event");
        }
    }
}
