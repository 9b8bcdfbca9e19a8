//! Agent process dispatch.
//!
//! The execution adapter boundary keeps the orchestration core free of
//! dynamically loaded code: an agent is an opaque executable unit whose
//! definition declares a command template, and [`CommandAdapter`] renders
//! and spawns that command inside the task's isolated working path with a
//! timeout, cancellation handling, and captured stdout/stderr logs.

use crate::briefing::template::{TemplateError, render_template};
use crate::definition::AgentDefinition;
use crate::error::{MusterError, Result};
use crate::task::ExecutionResult;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Poll interval while waiting on the agent process.
const WAIT_POLL: Duration = Duration::from_millis(25);

/// Everything an adapter needs to run one task.
pub struct DispatchContext {
    /// Execution id (e.g. "task-000001").
    pub task_id: String,
    /// The resolved agent definition.
    pub agent: Arc<AgentDefinition>,
    /// Path to the rendered briefing file.
    pub briefing_path: PathBuf,
    /// The isolated working path the agent runs in.
    pub worktree: PathBuf,
    /// Directory for stdout/stderr logs.
    pub logs_dir: PathBuf,
    /// Execution budget.
    pub timeout: Duration,
    /// Grace period between a cancel request and the hard kill.
    pub grace: Duration,
    /// Cooperative cancellation flag, set by the orchestrator.
    pub cancel: Arc<AtomicBool>,
    /// Task description, exposed to the command template.
    pub description: String,
}

/// Executes one resolved agent inside its isolation.
pub trait ExecutionAdapter: Send + Sync {
    /// Run the agent to completion, timeout, or cancellation.
    fn execute(&self, job: &DispatchContext) -> Result<ExecutionResult>;
}

/// Default adapter: renders the definition's command template and spawns
/// it as a subprocess.
pub struct CommandAdapter;

impl ExecutionAdapter for CommandAdapter {
    fn execute(&self, job: &DispatchContext) -> Result<ExecutionResult> {
        let template = job.agent.command.as_deref().ok_or_else(|| {
            MusterError::Config(format!(
                "agent '{}' declares no command and cannot be dispatched.\n\
                 Add a `command` field to {}.",
                job.agent.name,
                job.agent.source_path.display()
            ))
        })?;

        let command_str = render_command(template, job)?;
        let args = shell_words::split(&command_str).map_err(|e| {
            MusterError::Config(format!(
                "failed to parse agent command '{}': {}\n\
                 Fix: check for unmatched quotes or invalid escape sequences.",
                command_str, e
            ))
        })?;
        if args.is_empty() {
            return Err(MusterError::Config(format!(
                "agent command is empty after parsing: '{}'",
                command_str
            )));
        }

        std::fs::create_dir_all(&job.logs_dir).map_err(|e| {
            MusterError::Config(format!(
                "failed to create logs directory '{}': {}",
                job.logs_dir.display(),
                e
            ))
        })?;
        let stdout_path = job.logs_dir.join("stdout.log");
        let stderr_path = job.logs_dir.join("stderr.log");
        let stdout_file = std::fs::File::create(&stdout_path).map_err(|e| {
            MusterError::Config(format!(
                "failed to create stdout log '{}': {}",
                stdout_path.display(),
                e
            ))
        })?;
        let stderr_file = std::fs::File::create(&stderr_path).map_err(|e| {
            MusterError::Config(format!(
                "failed to create stderr log '{}': {}",
                stderr_path.display(),
                e
            ))
        })?;

        let mut command = Command::new(&args[0]);
        command
            .args(&args[1..])
            .current_dir(&job.worktree)
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));
        for (key, value) in &job.agent.environment {
            command.env(key, value);
        }

        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            MusterError::Config(format!(
                "failed to execute agent command '{}': {}\n\
                 Fix: ensure the command is installed and in PATH.",
                args[0], e
            ))
        })?;

        debug!(task = %job.task_id, command = %command_str, "agent process started");
        let (exit_code, timed_out) = wait_for_exit(&mut child, job, start)?;

        Ok(ExecutionResult {
            exit_code,
            stdout_path,
            stderr_path,
            duration: start.elapsed(),
            timed_out,
            command: command_str,
        })
    }
}

/// Render the command template with the task's variables.
fn render_command(template: &str, job: &DispatchContext) -> Result<String> {
    let mut variables = HashMap::new();
    variables.insert("task_id".to_string(), job.task_id.clone());
    variables.insert("agent".to_string(), job.agent.name.clone());
    variables.insert(
        "worktree".to_string(),
        job.worktree.to_string_lossy().to_string(),
    );
    variables.insert(
        "briefing_file".to_string(),
        job.briefing_path.to_string_lossy().to_string(),
    );
    variables.insert("description".to_string(), job.description.clone());

    render_template(template, &variables).map_err(|e| match e {
        TemplateError::UndefinedVariable { name, .. } => MusterError::Config(format!(
            "agent command template references undefined variable '{}'\n\
             Command: {}\n\
             Available variables: task_id, agent, worktree, briefing_file, description",
            name, template
        )),
        other => MusterError::Config(format!("invalid agent command template: {}", other)),
    })
}

/// Wait for the agent process, honoring timeout and cancellation.
///
/// On cancellation, the process gets the grace period to exit on its own
/// before the hard kill path. Returns (exit_code, timed_out).
fn wait_for_exit(
    child: &mut Child,
    job: &DispatchContext,
    start: Instant,
) -> Result<(Option<i32>, bool)> {
    let mut cancel_seen: Option<Instant> = None;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok((status.code(), false)),
            Ok(None) => {}
            Err(e) => {
                return Err(MusterError::Config(format!(
                    "failed to check agent process status: {}",
                    e
                )));
            }
        }

        if job.cancel.load(Ordering::SeqCst) {
            match cancel_seen {
                None => cancel_seen = Some(Instant::now()),
                Some(at) if at.elapsed() >= job.grace => {
                    kill_process(child);
                    return Ok((None, false));
                }
                Some(_) => {}
            }
        }

        if start.elapsed() >= job.timeout {
            kill_process(child);
            return Ok((None, true));
        }

        std::thread::sleep(WAIT_POLL);
    }
}

/// Hard kill path. On Unix this is SIGKILL.
fn kill_process(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
