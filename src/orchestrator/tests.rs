use super::dispatch::{DispatchContext, ExecutionAdapter};
use super::*;
use crate::briefing::ContextPreparer;
use crate::cache::Cache;
use crate::definition::store::DefinitionStore;
use crate::hierarchy::{HierarchyIndex, Tier};
use crate::task::ExecutionResult;
use crate::test_support::create_test_repo;
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;

struct Fixture {
    temp: TempDir,
    agents_dir: PathBuf,
    registry: Arc<Registry>,
    isolation: Arc<IsolationManager>,
    config: CoreConfig,
}

impl Fixture {
    fn new(max_parallel: usize) -> Self {
        let temp = create_test_repo();
        let agents_dir = temp.path().join(".muster").join("agents");
        std::fs::create_dir_all(&agents_dir).unwrap();

        let hierarchy = HierarchyIndex::from_entries(vec![(Tier::Project, agents_dir.clone())]);
        let registry = Arc::new(Registry::new(
            DefinitionStore::new(),
            Cache::new(Duration::from_secs(300), 1024 * 1024),
            hierarchy,
            Duration::from_secs(300),
            50,
        ));
        // Concurrent `git worktree add` can hit transient repo locks;
        // retries absorb that in the concurrency tests.
        let isolation = Arc::new(IsolationManager::new(
            temp.path().to_path_buf(),
            temp.path().join(".worktrees"),
            3,
            Duration::from_millis(25),
        ));
        let config = CoreConfig {
            max_parallel,
            cancel_grace_ms: 100,
            ..CoreConfig::default()
        };

        Self {
            temp,
            agents_dir,
            registry,
            isolation,
            config,
        }
    }

    fn write_agent(&self, file: &str, content: &str) -> PathBuf {
        let path = self.agents_dir.join(file);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn preparer(&self) -> Arc<ContextPreparer> {
        Arc::new(ContextPreparer::new(
            None,
            self.registry.cache().clone(),
            "test-project",
            Duration::from_millis(100),
            10,
        ))
    }

    fn orchestrator(&self) -> Orchestrator {
        self.registry.discover_all(true).unwrap();
        Orchestrator::new(
            self.registry.clone(),
            self.preparer(),
            self.isolation.clone(),
            EventLog::new(self.temp.path().join("events.ndjson")),
            self.temp.path().join(".muster").join("logs"),
            &self.config,
        )
        .unwrap()
    }

    fn orchestrator_with(&self, adapter: Arc<dyn ExecutionAdapter>) -> Orchestrator {
        self.registry.discover_all(true).unwrap();
        Orchestrator::with_adapter(
            self.registry.clone(),
            self.preparer(),
            self.isolation.clone(),
            adapter,
            EventLog::new(self.temp.path().join("events.ndjson")),
            self.temp.path().join(".muster").join("logs"),
            &self.config,
        )
        .unwrap()
    }
}

fn synthetic_result(exit_code: Option<i32>) -> ExecutionResult {
    ExecutionResult {
        exit_code,
        stdout_path: PathBuf::from("stdout.log"),
        stderr_path: PathBuf::from("stderr.log"),
        duration: Duration::from_millis(1),
        timed_out: false,
        command: "synthetic".to_string(),
    }
}

/// Adapter that sleeps briefly and tracks peak concurrency.
struct TrackingAdapter {
    sleep: Duration,
    running: AtomicUsize,
    max_seen: AtomicUsize,
}

impl TrackingAdapter {
    fn new(sleep: Duration) -> Self {
        Self {
            sleep,
            running: AtomicUsize::new(0),
            max_seen: AtomicUsize::new(0),
        }
    }
}

impl ExecutionAdapter for TrackingAdapter {
    fn execute(&self, _job: &DispatchContext) -> crate::error::Result<ExecutionResult> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.sleep);
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(synthetic_result(Some(0)))
    }
}

/// Adapter that blocks until the task is cancelled (bounded fallback).
struct BlockUntilCancelled;

impl ExecutionAdapter for BlockUntilCancelled {
    fn execute(&self, job: &DispatchContext) -> crate::error::Result<ExecutionResult> {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while !job.cancel.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(synthetic_result(None))
    }
}

fn qa_agent_yaml(command: &str) -> String {
    format!(
        "name: qa-agent\nkind: qa\ncapabilities: [test_execution]\nspecializations: [testing]\nroles: [reviewer]\ncommand: \"{}\"\n",
        command
    )
}

#[test]
fn test_submit_end_to_end() {
    let fx = Fixture::new(2);
    fx.write_agent("qa.yaml", &qa_agent_yaml("echo done {task_id}"));

    let orchestrator = fx.orchestrator();
    let execution = orchestrator
        .submit(TaskRequest::for_agent("qa-agent", "run the suite"))
        .unwrap();

    assert_eq!(execution.status, TaskStatus::Succeeded);
    assert!(execution.started_at.is_some());
    assert!(execution.finished_at.is_some());

    let result = execution.result.unwrap();
    assert!(result.is_success());
    let stdout = std::fs::read_to_string(&result.stdout_path).unwrap();
    assert!(stdout.contains("done"));

    // The briefing was materialized next to the logs.
    let briefing = fx
        .temp
        .path()
        .join(".muster")
        .join("logs")
        .join(&execution.id)
        .join("briefing.md");
    assert!(briefing.exists());
    assert!(
        std::fs::read_to_string(&briefing)
            .unwrap()
            .contains("run the suite")
    );

    // Isolation was released on the terminal path.
    assert_eq!(fx.isolation.active_count(), 0);
    assert!(!fx.temp.path().join(".worktrees").join(&execution.id).exists());
}

#[test]
fn test_pool_ceiling_holds_under_load() {
    let fx = Fixture::new(3);
    fx.write_agent("qa.yaml", &qa_agent_yaml("unused"));

    let adapter = Arc::new(TrackingAdapter::new(Duration::from_millis(60)));
    let orchestrator = fx.orchestrator_with(adapter.clone());

    let handles = orchestrator
        .submit_batch(
            (0..10)
                .map(|i| TaskRequest::for_agent("qa-agent", format!("task {}", i)))
                .collect(),
        )
        .unwrap();

    for handle in &handles {
        let execution = handle.wait();
        assert_eq!(execution.status, TaskStatus::Succeeded);
    }

    assert!(adapter.max_seen.load(Ordering::SeqCst) <= 3);
    assert_eq!(fx.isolation.active_count(), 0);
}

#[test]
fn test_unknown_agent_fails_with_not_found() {
    let fx = Fixture::new(1);
    let orchestrator = fx.orchestrator();

    let execution = orchestrator
        .submit(TaskRequest::for_agent("ghost", "work"))
        .unwrap();

    assert_eq!(execution.status, TaskStatus::Failed);
    assert!(execution.failure.unwrap().contains("no agent matches"));
}

#[test]
fn test_capability_resolution_prefers_high_confidence() {
    let fx = Fixture::new(1);
    // Scores 30: low confidence.
    fx.write_agent(
        "weak.yaml",
        "name: weak\nkind: qa\ncapabilities: [test_execution]\ncommand: \"echo weak\"\n",
    );
    // Scores above the floor.
    fx.write_agent("strong.yaml", &qa_agent_yaml("echo strong"));

    let orchestrator = fx.orchestrator();
    let execution = orchestrator
        .submit(TaskRequest::for_capability("test_execution", "verify"))
        .unwrap();

    assert_eq!(execution.status, TaskStatus::Succeeded);
    assert_eq!(execution.agent.unwrap().name, "qa-agent");
}

#[test]
fn test_only_low_confidence_matches_is_not_found() {
    let fx = Fixture::new(1);
    fx.write_agent(
        "weak.yaml",
        "name: weak\nkind: qa\ncapabilities: [test_execution]\ncommand: \"echo weak\"\n",
    );

    let orchestrator = fx.orchestrator();
    let execution = orchestrator
        .submit(TaskRequest::for_capability("test_execution", "verify"))
        .unwrap();

    assert_eq!(execution.status, TaskStatus::Failed);
    assert!(execution.failure.unwrap().contains("no agent matches"));
}

#[test]
fn test_queued_tasks_fail_not_found_when_definition_deleted() {
    let fx = Fixture::new(1);
    fx.write_agent("runner.yaml", &qa_agent_yaml("unused"));
    let victim_path = fx.write_agent(
        "victim.yaml",
        "name: victim\nkind: ops\ncommand: \"echo victim\"\n",
    );

    let adapter = Arc::new(TrackingAdapter::new(Duration::from_millis(300)));
    let orchestrator = fx.orchestrator_with(adapter);

    // One slow task occupies the single worker while five more queue up.
    let blocker = orchestrator
        .submit_async(TaskRequest::for_agent("qa-agent", "blocker"))
        .unwrap();
    let queued: Vec<_> = (0..5)
        .map(|i| {
            orchestrator
                .submit_async(TaskRequest::for_agent("victim", format!("queued {}", i)))
                .unwrap()
        })
        .collect();

    // The definition disappears while they wait (watcher semantics:
    // removal plus cache invalidation).
    std::fs::remove_file(&victim_path).unwrap();
    fx.registry
        .cache()
        .invalidate(&AgentDefinition::cache_prefix("victim"));

    assert_eq!(blocker.wait().status, TaskStatus::Succeeded);
    for handle in queued {
        let execution = handle.wait();
        assert_eq!(execution.status, TaskStatus::Failed);
        assert!(execution.failure.unwrap().contains("no agent matches"));
    }
    assert_eq!(fx.isolation.active_count(), 0);
}

#[test]
fn test_cancel_queued_task_has_no_side_effects() {
    let fx = Fixture::new(1);
    fx.write_agent("qa.yaml", &qa_agent_yaml("unused"));

    let adapter = Arc::new(TrackingAdapter::new(Duration::from_millis(200)));
    let orchestrator = fx.orchestrator_with(adapter);

    let blocker = orchestrator
        .submit_async(TaskRequest::for_agent("qa-agent", "blocker"))
        .unwrap();
    let queued = orchestrator
        .submit_async(TaskRequest::for_agent("qa-agent", "queued"))
        .unwrap();

    orchestrator.cancel(queued.id()).unwrap();
    let execution = queued.wait();

    assert_eq!(execution.status, TaskStatus::Cancelled);
    // Never started: no agent resolution, no isolation.
    assert!(execution.started_at.is_none());
    assert!(execution.isolation_path.is_none());

    assert_eq!(blocker.wait().status, TaskStatus::Succeeded);
}

#[test]
fn test_cancellation_storm_releases_all_isolation() {
    let fx = Fixture::new(4);
    fx.write_agent("qa.yaml", &qa_agent_yaml("unused"));

    let orchestrator = fx.orchestrator_with(Arc::new(BlockUntilCancelled));

    let handles = orchestrator
        .submit_batch(
            (0..8)
                .map(|i| TaskRequest::for_agent("qa-agent", format!("storm {}", i)))
                .collect(),
        )
        .unwrap();

    // Let the pool pick up the first wave.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while orchestrator.running_count() < 4 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    for handle in &handles {
        orchestrator.cancel(handle.id()).unwrap();
    }

    for handle in &handles {
        let execution = handle.wait();
        assert_eq!(execution.status, TaskStatus::Cancelled);
    }

    // No leaked working copies: nothing active, nothing to prune.
    assert_eq!(fx.isolation.active_count(), 0);
    assert_eq!(fx.isolation.prune_orphans().unwrap(), 0);
}

#[test]
fn test_timeout_marks_failed_and_releases_isolation() {
    let fx = Fixture::new(1);
    fx.write_agent("slow.yaml", "name: slow\nkind: ops\ncommand: \"sleep 30\"\n");

    let orchestrator = fx.orchestrator();
    let request = TaskRequest {
        timeout_seconds: Some(1),
        ..TaskRequest::for_agent("slow", "sleepy work")
    };

    let execution = orchestrator.submit(request).unwrap();
    assert_eq!(execution.status, TaskStatus::Failed);
    assert!(execution.failure.unwrap().contains("timed out"));
    assert!(execution.result.unwrap().timed_out);
    assert_eq!(fx.isolation.active_count(), 0);
}

#[test]
fn test_submit_discards_collected_record() {
    let fx = Fixture::new(1);
    fx.write_agent("qa.yaml", &qa_agent_yaml("echo ok"));

    let orchestrator = fx.orchestrator();
    let execution = orchestrator
        .submit(TaskRequest::for_agent("qa-agent", "work"))
        .unwrap();

    assert!(orchestrator.execution(&execution.id).is_none());
}

#[test]
fn test_async_records_retained_until_collected() {
    let fx = Fixture::new(1);
    fx.write_agent("qa.yaml", &qa_agent_yaml("echo ok"));

    let orchestrator = fx.orchestrator();
    let handle = orchestrator
        .submit_async(TaskRequest::for_agent("qa-agent", "work"))
        .unwrap();
    handle.wait();

    // Retained for auditing until collected.
    assert!(orchestrator.execution(handle.id()).is_some());
    let collected = orchestrator.collect(handle.id()).unwrap();
    assert_eq!(collected.status, TaskStatus::Succeeded);
    assert!(orchestrator.execution(handle.id()).is_none());
}

#[test]
fn test_retention_window_bounds_terminal_records() {
    let fx = Fixture::new(1);
    fx.write_agent("qa.yaml", &qa_agent_yaml("unused"));

    let adapter = Arc::new(TrackingAdapter::new(Duration::from_millis(1)));
    let mut config = fx.config.clone();
    config.retention_completed = 3;
    fx.registry.discover_all(true).unwrap();
    let orchestrator = Orchestrator::with_adapter(
        fx.registry.clone(),
        fx.preparer(),
        fx.isolation.clone(),
        adapter,
        EventLog::new(fx.temp.path().join("events.ndjson")),
        fx.temp.path().join(".muster").join("logs"),
        &config,
    )
    .unwrap();

    let mut ids = Vec::new();
    for i in 0..6 {
        let handle = orchestrator
            .submit_async(TaskRequest::for_agent("qa-agent", format!("task {}", i)))
            .unwrap();
        handle.wait();
        ids.push(handle.id().to_string());
    }

    // The oldest records were pruned past the retention window.
    assert!(orchestrator.execution(&ids[0]).is_none());
    assert!(orchestrator.execution(ids.last().unwrap()).is_some());
}

#[test]
fn test_startup_prunes_orphans_from_crashed_run() {
    let fx = Fixture::new(1);
    fx.write_agent("qa.yaml", &qa_agent_yaml("echo ok"));

    // Simulate a crash: isolations exist that no manager tracks.
    {
        let crashed = IsolationManager::new(
            fx.temp.path().to_path_buf(),
            fx.temp.path().join(".worktrees"),
            1,
            Duration::from_millis(10),
        );
        crashed.acquire("task-900001").unwrap();
    }

    let _orchestrator = fx.orchestrator();
    assert!(!fx.temp.path().join(".worktrees").join("task-900001").exists());
}

#[test]
fn test_empty_description_rejected() {
    let fx = Fixture::new(1);
    let orchestrator = fx.orchestrator();

    let err = orchestrator.submit(TaskRequest::default()).unwrap_err();
    assert!(matches!(err, MusterError::Config(_)));
}

#[test]
fn test_cancel_unknown_task_is_not_found() {
    let fx = Fixture::new(1);
    let orchestrator = fx.orchestrator();

    let err = orchestrator.cancel("task-999999").unwrap_err();
    assert!(matches!(err, MusterError::NotFound(_)));
}
