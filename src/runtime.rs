//! Runtime wiring of the core components.
//!
//! The runtime constructs each component explicitly and passes it to its
//! dependents (no global singletons), in an order derived from the
//! component dependency graph. The only fatal startup condition is a
//! hierarchy with no readable tier directory at all; everything else
//! degrades per-component.

use crate::briefing::ContextPreparer;
use crate::cache::{Cache, CacheSweeper};
use crate::config::CoreConfig;
use crate::context::CoreContext;
use crate::dag::DependencyGraph;
use crate::definition::store::DefinitionStore;
use crate::error::{MusterError, Result};
use crate::events::{Event, EventAction, EventLog};
use crate::hierarchy::HierarchyIndex;
use crate::isolation::IsolationManager;
use crate::knowledge::KnowledgeStore;
use crate::orchestrator::Orchestrator;
use crate::registry::Registry;
use crate::watcher::ModificationWatcher;
use crate::watcher::backup::BackupStore;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Component names in the startup graph.
const COMPONENTS: [&str; 7] = [
    "definition-store",
    "cache",
    "registry",
    "watcher",
    "context-preparer",
    "isolation",
    "orchestrator",
];

/// Fully wired muster core.
pub struct Runtime {
    /// Resolved workspace paths.
    pub context: CoreContext,
    /// Loaded configuration (read-only after startup).
    pub config: CoreConfig,
    /// The agent registry.
    pub registry: Arc<Registry>,
    /// The isolation manager.
    pub isolation: Arc<IsolationManager>,
    /// The task orchestrator.
    pub orchestrator: Orchestrator,
    /// The audit event log.
    pub events: EventLog,
    watcher: Option<ModificationWatcher>,
    _sweeper: CacheSweeper,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("context", &self.context)
            .field("config", &self.config)
            .field("watcher_active", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Construct the core from a resolved context, loading config from
    /// the workspace. Performs initial discovery and prunes orphaned
    /// isolations.
    pub fn bootstrap(context: CoreContext) -> Result<Self> {
        let config = CoreConfig::load(context.config_path())?;
        Self::bootstrap_with(context, config, None)
    }

    /// Construct the core with explicit config and an optional knowledge
    /// store collaborator.
    pub fn bootstrap_with(
        context: CoreContext,
        config: CoreConfig,
        knowledge: Option<Arc<dyn KnowledgeStore>>,
    ) -> Result<Self> {
        let order = startup_order()?;
        debug!(order = ?order, "component startup order");

        let hierarchy = HierarchyIndex::build(&context.repo_root, &config);
        if hierarchy.is_empty() {
            return Err(MusterError::Config(format!(
                "no agent directories found at any tier.\n\
                 Expected at least one of: {} (project), the user agents \
                 directory, or a configured system directory.\n\n\
                 Run `muster init` to create the project tier.",
                context.agents_dir.display()
            )));
        }

        let events = EventLog::new(context.events_file());

        let mut registry = None;
        let mut isolation = None;
        let mut preparer = None;
        let mut orchestrator = None;
        let mut sweeper = None;
        let cache = Cache::new(config.cache_ttl(), config.cache_budget_bytes);
        let store = DefinitionStore::new();

        for component in &order {
            match component.as_str() {
                "definition-store" => {}
                "cache" => {
                    sweeper = Some(cache.start_sweeper(config.cache_sweep_interval()));
                }
                "registry" => {
                    let built = Arc::new(Registry::new(
                        store.clone(),
                        cache.clone(),
                        hierarchy.clone(),
                        config.cache_ttl(),
                        config.min_validation_score,
                    ));
                    let discovered = built.discover_all(false)?;
                    events.append_best_effort(
                        &Event::new(EventAction::Discover)
                            .with_details(json!({ "agents": discovered.len() })),
                    );
                    registry = Some(built);
                }
                "watcher" => {
                    // Started lazily via `start_watcher`; operators opt in.
                }
                "context-preparer" => {
                    let project = context
                        .repo_root
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_else(|| "workspace".to_string());
                    preparer = Some(Arc::new(ContextPreparer::new(
                        knowledge.clone(),
                        cache.clone(),
                        project,
                        config.knowledge_timeout(),
                        config.knowledge_record_limit,
                    )));
                }
                "isolation" => {
                    isolation = Some(Arc::new(IsolationManager::new(
                        context.repo_root.clone(),
                        context.worktrees_dir.clone(),
                        config.isolation_retries,
                        config.isolation_backoff(),
                    )));
                }
                "orchestrator" => {
                    let registry = registry
                        .clone()
                        .ok_or_else(|| component_missing("registry"))?;
                    let preparer = preparer
                        .clone()
                        .ok_or_else(|| component_missing("context-preparer"))?;
                    let isolation = isolation
                        .clone()
                        .ok_or_else(|| component_missing("isolation"))?;
                    orchestrator = Some(Orchestrator::new(
                        registry,
                        preparer,
                        isolation,
                        events.clone(),
                        context.state_dir.join("logs"),
                        &config,
                    )?);
                }
                other => {
                    return Err(MusterError::Config(format!(
                        "unknown component '{}' in startup order",
                        other
                    )));
                }
            }
        }

        let registry = registry.ok_or_else(|| component_missing("registry"))?;
        let isolation = isolation.ok_or_else(|| component_missing("isolation"))?;
        let orchestrator = orchestrator.ok_or_else(|| component_missing("orchestrator"))?;
        let sweeper = sweeper.ok_or_else(|| component_missing("cache"))?;

        info!(agents = registry.snapshot().len(), "muster core started");

        Ok(Self {
            context,
            config,
            registry,
            isolation,
            orchestrator,
            events,
            watcher: None,
            _sweeper: sweeper,
        })
    }

    /// Start the modification watcher over the hierarchy directories.
    pub fn start_watcher(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let roots: Vec<PathBuf> = HierarchyIndex::build(&self.context.repo_root, &self.config)
            .entries()
            .iter()
            .map(|(_, dir)| dir.clone())
            .collect();
        let backups = BackupStore::new(
            self.context.backups_dir.clone(),
            self.config.backup_keep_count,
            self.config.backup_keep_days,
        );

        self.watcher = Some(ModificationWatcher::spawn(
            self.registry.clone(),
            backups,
            self.events.clone(),
            roots,
            self.config.watch_debounce(),
        )?);
        Ok(())
    }

    /// Whether the watcher is running.
    pub fn watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Stop the watcher and background threads.
    pub fn shutdown(mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
    }
}

fn component_missing(name: &str) -> MusterError {
    MusterError::Config(format!(
        "startup order did not construct component '{}'",
        name
    ))
}

/// The component dependency graph from the architecture: store and cache
/// first, registry over both, watcher over the registry, preparer and
/// isolation before the orchestrator.
fn startup_order() -> Result<Vec<String>> {
    let mut graph = DependencyGraph::new();
    for component in COMPONENTS {
        graph.add_node(component);
    }

    let edges = [
        ("registry", "definition-store"),
        ("registry", "cache"),
        ("watcher", "registry"),
        ("watcher", "cache"),
        ("context-preparer", "registry"),
        ("orchestrator", "registry"),
        ("orchestrator", "context-preparer"),
        ("orchestrator", "isolation"),
    ];
    for (node, dependency) in edges {
        graph
            .depends_on(node, dependency)
            .map_err(|e| MusterError::Config(format!("invalid component graph: {}", e)))?;
    }

    graph
        .start_order()
        .map_err(|e| MusterError::Config(format!("invalid component graph: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskRequest, TaskStatus};
    use crate::test_support::create_test_repo;

    fn init_workspace(repo: &std::path::Path) -> CoreContext {
        let ctx = CoreContext::resolve_from(repo).unwrap();
        std::fs::create_dir_all(&ctx.agents_dir).unwrap();
        ctx
    }

    fn isolated_config() -> CoreConfig {
        CoreConfig {
            user_agents_dir: Some(PathBuf::from("/nonexistent/muster-user")),
            system_agents_dir: Some(PathBuf::from("/nonexistent/muster-system")),
            ..CoreConfig::default()
        }
    }

    #[test]
    fn test_startup_order_respects_dependencies() {
        let order = startup_order().unwrap();
        let position = |name: &str| order.iter().position(|c| c == name).unwrap();

        assert!(position("definition-store") < position("registry"));
        assert!(position("cache") < position("registry"));
        assert!(position("registry") < position("watcher"));
        assert!(position("registry") < position("orchestrator"));
        assert!(position("context-preparer") < position("orchestrator"));
        assert!(position("isolation") < position("orchestrator"));
    }

    #[test]
    fn test_bootstrap_requires_some_tier_directory() {
        let temp_dir = create_test_repo();
        let ctx = CoreContext::resolve_from(temp_dir.path()).unwrap();
        // No .muster/agents anywhere, and user/system point nowhere.
        let err = Runtime::bootstrap_with(ctx, isolated_config(), None).unwrap_err();
        assert!(matches!(err, MusterError::Config(_)));
        assert!(err.to_string().contains("no agent directories"));
    }

    #[test]
    fn test_bootstrap_discovers_and_dispatches() {
        let temp_dir = create_test_repo();
        let ctx = init_workspace(temp_dir.path());
        std::fs::write(
            ctx.agents_dir.join("echo.yaml"),
            "name: echo-agent\nkind: ops\ncommand: \"echo bootstrapped\"\n",
        )
        .unwrap();

        let runtime = Runtime::bootstrap_with(ctx, isolated_config(), None).unwrap();
        assert_eq!(runtime.registry.snapshot().len(), 1);

        let execution = runtime
            .orchestrator
            .submit(TaskRequest::for_agent("echo-agent", "say hello"))
            .unwrap();
        assert_eq!(execution.status, TaskStatus::Succeeded);

        runtime.shutdown();
    }

    #[test]
    fn test_watcher_lifecycle() {
        let temp_dir = create_test_repo();
        let ctx = init_workspace(temp_dir.path());

        let mut runtime = Runtime::bootstrap_with(ctx, isolated_config(), None).unwrap();
        assert!(!runtime.watching());

        runtime.start_watcher().unwrap();
        assert!(runtime.watching());
        // Idempotent.
        runtime.start_watcher().unwrap();

        runtime.shutdown();
    }
}
