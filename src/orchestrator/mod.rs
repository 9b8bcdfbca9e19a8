//! Task orchestrator.
//!
//! Accepts task requests, resolves and validates agents via the registry,
//! prepares context, acquires isolated execution environments, and
//! dispatches up to N concurrent executions over a bounded worker pool.
//!
//! Every execution reaches exactly one terminal state, and its isolation
//! handle is released exactly once on every terminal path, including
//! cancellation and dispatch errors. Cancelling a queued task removes it
//! without side effects; cancelling a running task signals the execution
//! to stop and hard-kills it after a grace period.

pub mod dispatch;
pub mod pool;

#[cfg(test)]
mod tests;

use crate::briefing::ContextPreparer;
use crate::config::CoreConfig;
use crate::definition::AgentDefinition;
use crate::error::{MusterError, Result};
use crate::events::{Event, EventAction, EventLog};
use crate::isolation::IsolationManager;
use crate::registry::Registry;
use crate::task::{TaskExecution, TaskRequest, TaskStatus};
use chrono::Utc;
use dispatch::{CommandAdapter, DispatchContext, ExecutionAdapter};
use parking_lot::{Condvar, Mutex};
use pool::WorkerPool;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Shared record of one execution, used by workers and handles.
struct ExecutionCell {
    state: Mutex<TaskExecution>,
    done: Condvar,
    cancel: Arc<AtomicBool>,
}

impl ExecutionCell {
    fn new(execution: TaskExecution) -> Self {
        Self {
            state: Mutex::new(execution),
            done: Condvar::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    fn snapshot(&self) -> TaskExecution {
        self.state.lock().clone()
    }

    fn finish(&self, update: impl FnOnce(&mut TaskExecution)) {
        let mut state = self.state.lock();
        update(&mut state);
        state.finished_at = Some(Utc::now());
        drop(state);
        self.done.notify_all();
    }
}

/// Handle to an asynchronously submitted task.
pub struct TaskHandle {
    id: String,
    cell: Arc<ExecutionCell>,
}

impl TaskHandle {
    /// The execution id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.cell.state.lock().status
    }

    /// Snapshot of the execution record.
    pub fn snapshot(&self) -> TaskExecution {
        self.cell.snapshot()
    }

    /// Block until the execution reaches a terminal state.
    pub fn wait(&self) -> TaskExecution {
        let mut state = self.cell.state.lock();
        self.cell
            .done
            .wait_while(&mut state, |e| !e.status.is_terminal());
        state.clone()
    }

    /// Block up to `timeout` for a terminal state.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskExecution> {
        let mut state = self.cell.state.lock();
        let result =
            self.cell
                .done
                .wait_while_for(&mut state, |e| !e.status.is_terminal(), timeout);
        if result.timed_out() {
            None
        } else {
            Some(state.clone())
        }
    }
}

#[derive(Default)]
struct ExecutionTable {
    cells: HashMap<String, Arc<ExecutionCell>>,
    order: VecDeque<String>,
}

/// Dispatches tasks to agents with bounded concurrency.
pub struct Orchestrator {
    registry: Arc<Registry>,
    preparer: Arc<ContextPreparer>,
    isolation: Arc<IsolationManager>,
    adapter: Arc<dyn ExecutionAdapter>,
    events: EventLog,
    pool: WorkerPool,
    table: Arc<Mutex<ExecutionTable>>,
    seq: AtomicU64,
    logs_root: PathBuf,
    default_timeout_seconds: u64,
    grace: Duration,
    retention: usize,
}

impl Orchestrator {
    /// Create an orchestrator dispatching via the default command adapter.
    ///
    /// Orphaned isolations from a crashed prior run are pruned here, at
    /// startup, before any new task can race them.
    pub fn new(
        registry: Arc<Registry>,
        preparer: Arc<ContextPreparer>,
        isolation: Arc<IsolationManager>,
        events: EventLog,
        logs_root: PathBuf,
        config: &CoreConfig,
    ) -> Result<Self> {
        Self::with_adapter(
            registry,
            preparer,
            isolation,
            Arc::new(CommandAdapter),
            events,
            logs_root,
            config,
        )
    }

    /// Create an orchestrator with a custom execution adapter.
    pub fn with_adapter(
        registry: Arc<Registry>,
        preparer: Arc<ContextPreparer>,
        isolation: Arc<IsolationManager>,
        adapter: Arc<dyn ExecutionAdapter>,
        events: EventLog,
        logs_root: PathBuf,
        config: &CoreConfig,
    ) -> Result<Self> {
        let pruned = isolation.prune_orphans()?;
        if pruned > 0 {
            events.append_best_effort(
                &Event::new(EventAction::Prune).with_details(json!({ "orphans": pruned })),
            );
        }

        Ok(Self {
            registry,
            preparer,
            isolation,
            adapter,
            events,
            pool: WorkerPool::new(config.max_parallel),
            table: Arc::new(Mutex::new(ExecutionTable::default())),
            seq: AtomicU64::new(1),
            logs_root,
            default_timeout_seconds: config.task_timeout_seconds,
            grace: config.cancel_grace(),
            retention: config.retention_completed,
        })
    }

    /// Number of worker threads (the concurrency ceiling).
    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Submit a task and block until it completes.
    ///
    /// The execution record is discarded from the retention table once
    /// returned; use [`Orchestrator::submit_async`] to keep polling it.
    pub fn submit(&self, request: TaskRequest) -> Result<TaskExecution> {
        let handle = self.submit_async(request)?;
        let execution = handle.wait();
        self.discard(handle.id());
        Ok(execution)
    }

    /// Submit a task without blocking.
    pub fn submit_async(&self, request: TaskRequest) -> Result<TaskHandle> {
        if request.description.is_empty() {
            return Err(MusterError::Config(
                "task request must have a description".to_string(),
            ));
        }

        let id = format!("task-{:06}", self.seq.fetch_add(1, Ordering::SeqCst));
        let cell = Arc::new(ExecutionCell::new(TaskExecution::queued(
            id.clone(),
            request,
        )));

        {
            let mut table = self.table.lock();
            table.cells.insert(id.clone(), cell.clone());
            table.order.push_back(id.clone());
            Self::prune_table(&mut table, self.retention);
        }

        let registry = self.registry.clone();
        let preparer = self.preparer.clone();
        let isolation = self.isolation.clone();
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let logs_root = self.logs_root.clone();
        let default_timeout = self.default_timeout_seconds;
        let grace = self.grace;
        let worker_cell = cell.clone();
        let worker_id = id.clone();

        self.pool.execute(move || {
            run_task(
                &registry,
                &preparer,
                &isolation,
                adapter.as_ref(),
                &events,
                &logs_root,
                default_timeout,
                grace,
                &worker_id,
                &worker_cell,
            );
        });

        Ok(TaskHandle { id, cell })
    }

    /// Submit a batch of independent tasks against the shared pool.
    ///
    /// Tasks are unordered with respect to each other; dependencies
    /// between tasks are not auto-detected and must be expressed by
    /// submitting dependents sequentially after their inputs complete.
    pub fn submit_batch(&self, requests: Vec<TaskRequest>) -> Result<Vec<TaskHandle>> {
        requests
            .into_iter()
            .map(|request| self.submit_async(request))
            .collect()
    }

    /// Cancel a task.
    ///
    /// A still-queued task is removed without side effects. A running
    /// task is signalled to stop; its isolation is released regardless of
    /// whether the stop is honored promptly (hard kill after the grace
    /// period).
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        let cell = self
            .table
            .lock()
            .cells
            .get(task_id)
            .cloned()
            .ok_or_else(|| MusterError::NotFound(task_id.to_string()))?;

        cell.cancel.store(true, Ordering::SeqCst);

        let mut state = cell.state.lock();
        if state.status == TaskStatus::Queued {
            state.status = TaskStatus::Cancelled;
            state.finished_at = Some(Utc::now());
            drop(state);
            cell.done.notify_all();
        } else {
            drop(state);
        }

        self.events
            .append_best_effort(&Event::new(EventAction::Cancel).with_task(task_id));
        Ok(())
    }

    /// Snapshot of one execution record, if retained.
    pub fn execution(&self, task_id: &str) -> Option<TaskExecution> {
        let cell = self.table.lock().cells.get(task_id).cloned()?;
        Some(cell.snapshot())
    }

    /// Remove and return a terminal execution record.
    pub fn collect(&self, task_id: &str) -> Option<TaskExecution> {
        let snapshot = self.execution(task_id)?;
        if snapshot.status.is_terminal() {
            self.discard(task_id);
            Some(snapshot)
        } else {
            None
        }
    }

    /// Number of executions currently in `Running` state.
    pub fn running_count(&self) -> usize {
        let table = self.table.lock();
        table
            .cells
            .values()
            .filter(|cell| cell.state.lock().status == TaskStatus::Running)
            .count()
    }

    fn discard(&self, task_id: &str) {
        let mut table = self.table.lock();
        table.cells.remove(task_id);
        table.order.retain(|id| id != task_id);
    }

    /// Drop oldest terminal records beyond the retention window. Live
    /// records are never pruned.
    fn prune_table(table: &mut ExecutionTable, retention: usize) {
        while table.order.len() > retention {
            let Some(oldest) = table.order.front().cloned() else {
                break;
            };
            let terminal = table
                .cells
                .get(&oldest)
                .map(|cell| cell.state.lock().status.is_terminal())
                .unwrap_or(true);
            if !terminal {
                break;
            }
            table.order.pop_front();
            table.cells.remove(&oldest);
        }
    }
}

/// Resolve the target agent for a request.
///
/// An explicit name resolves through the registry (observing on-disk
/// mutations); otherwise the capability query picks the top-ranked
/// non-low-confidence match.
fn resolve_agent(registry: &Registry, request: &TaskRequest) -> Result<Arc<AgentDefinition>> {
    if let Some(name) = &request.agent {
        return registry.get_agent(name);
    }

    let query = request.capability_query();
    registry
        .search_by_capability(query)
        .into_iter()
        .find(|m| !m.low_confidence)
        .map(|m| m.definition)
        .ok_or_else(|| MusterError::NotFound(query.to_string()))
}

/// Releases a task's isolation exactly once, including on panic paths.
struct ReleaseGuard<'a> {
    isolation: &'a IsolationManager,
    task_id: &'a str,
    armed: bool,
}

impl<'a> ReleaseGuard<'a> {
    fn new(isolation: &'a IsolationManager, task_id: &'a str) -> Self {
        Self {
            isolation,
            task_id,
            armed: true,
        }
    }

    fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.armed {
            self.armed = false;
            if let Err(err) = self.isolation.release(self.task_id) {
                warn!(task = %self.task_id, error = %err, "isolation release failed");
            }
        }
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[allow(clippy::too_many_arguments)]
fn run_task(
    registry: &Registry,
    preparer: &ContextPreparer,
    isolation: &IsolationManager,
    adapter: &dyn ExecutionAdapter,
    events: &EventLog,
    logs_root: &PathBuf,
    default_timeout_seconds: u64,
    grace: Duration,
    task_id: &str,
    cell: &ExecutionCell,
) {
    // A task cancelled while queued is dropped without side effects.
    {
        let mut state = cell.state.lock();
        if state.status.is_terminal() {
            return;
        }
        if cell.cancel.load(Ordering::SeqCst) {
            state.status = TaskStatus::Cancelled;
            state.finished_at = Some(Utc::now());
            drop(state);
            cell.done.notify_all();
            return;
        }
        state.status = TaskStatus::Running;
        state.started_at = Some(Utc::now());
    }

    let request = cell.state.lock().request.clone();

    // Resolution happens at dispatch time, so a definition deleted while
    // the task sat in the queue fails cleanly instead of hanging.
    let agent = match resolve_agent(registry, &request) {
        Ok(agent) => agent,
        Err(err) => {
            fail(cell, events, task_id, err.to_string());
            return;
        }
    };
    cell.state.lock().agent = Some(agent.clone());

    let bundle = preparer.prepare(&agent, &request);

    let worktree = match isolation.acquire(task_id) {
        Ok(path) => path,
        Err(err) => {
            fail(cell, events, task_id, err.to_string());
            return;
        }
    };
    cell.state.lock().isolation_path = Some(worktree.clone());
    let guard = ReleaseGuard::new(isolation, task_id);

    let logs_dir = logs_root.join(task_id);
    let briefing_path = logs_dir.join("briefing.md");
    if let Err(err) = std::fs::create_dir_all(&logs_dir)
        .and_then(|()| std::fs::write(&briefing_path, &bundle.instructions))
    {
        drop(guard);
        fail(
            cell,
            events,
            task_id,
            format!("failed to write briefing '{}': {}", briefing_path.display(), err),
        );
        return;
    }

    events.append_best_effort(
        &Event::new(EventAction::Dispatch)
            .with_task(task_id)
            .with_details(json!({
                "agent": agent.name,
                "degraded_context": bundle.memory_unavailable,
            })),
    );
    info!(task = %task_id, agent = %agent.name, "dispatching task");

    let timeout_seconds = request
        .timeout_seconds
        .unwrap_or_else(|| agent.effective_timeout(default_timeout_seconds));
    let job = DispatchContext {
        task_id: task_id.to_string(),
        agent: agent.clone(),
        briefing_path,
        worktree,
        logs_dir,
        timeout: Duration::from_secs(timeout_seconds),
        grace,
        cancel: cell.cancel.clone(),
        description: request.description.clone(),
    };

    let outcome = adapter.execute(&job);
    guard.release();

    match outcome {
        Ok(result) => {
            let cancelled = cell.cancel.load(Ordering::SeqCst);
            let timed_out = result.timed_out;
            let succeeded = result.is_success();
            cell.finish(|state| {
                state.result = Some(result);
                state.status = if cancelled {
                    TaskStatus::Cancelled
                } else if succeeded {
                    TaskStatus::Succeeded
                } else {
                    TaskStatus::Failed
                };
                if timed_out && !cancelled {
                    state.failure = Some(format!(
                        "timed out: exceeded {}s execution budget",
                        timeout_seconds
                    ));
                } else if !succeeded && !cancelled {
                    state.failure = Some("agent exited unsuccessfully".to_string());
                }
            });

            let status = cell.state.lock().status;
            events.append_best_effort(
                &Event::new(EventAction::Complete)
                    .with_task(task_id)
                    .with_details(json!({
                        "agent": agent.name,
                        "status": format!("{:?}", status),
                        "timed_out": timed_out,
                    })),
            );
        }
        Err(err) => {
            let cancelled = cell.cancel.load(Ordering::SeqCst);
            if cancelled {
                cell.finish(|state| {
                    state.status = TaskStatus::Cancelled;
                });
                events.append_best_effort(&Event::new(EventAction::Cancel).with_task(task_id));
            } else {
                fail(cell, events, task_id, err.to_string());
            }
        }
    }
}

fn fail(cell: &ExecutionCell, events: &EventLog, task_id: &str, reason: String) {
    warn!(task = %task_id, reason = %reason, "task failed");
    cell.finish(|state| {
        state.status = TaskStatus::Failed;
        state.failure = Some(reason.clone());
    });
    events.append_best_effort(
        &Event::new(EventAction::Complete)
            .with_task(task_id)
            .with_details(json!({ "status": "Failed", "reason": reason })),
    );
}
