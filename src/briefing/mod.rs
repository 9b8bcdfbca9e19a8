//! Context preparation for agent dispatch.
//!
//! Assembles the [`ContextBundle`] handed to an agent execution: the
//! agent's definition, instructions rendered from the briefing template,
//! a role-filtered bounded set of knowledge records (most relevant first),
//! and the caller-supplied requirements and deliverables.
//!
//! Knowledge retrieval is best-effort: a store failure or timeout marks
//! the bundle `memory_unavailable` instead of failing, so execution is
//! never blocked on an optional enrichment step.

pub mod template;

use crate::cache::{Cache, CacheValue};
use crate::definition::{AgentDefinition, AgentKind};
use crate::knowledge::{CircuitBreaker, KnowledgeQuery, KnowledgeStore, MemoryRecord};
use crate::task::TaskRequest;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use template::render_template;
use tracing::{debug, warn};

/// Default briefing template rendered for each dispatch.
const BRIEFING_TEMPLATE: &str = r#"# Task: {description}

## Agent
{agent_name} ({agent_kind})
{agent_description}

## Requirements
{requirements}

## Deliverables
{deliverables}

## Relevant knowledge
{knowledge}
"#;

/// The assembled input handed to one agent execution.
#[derive(Debug, Clone)]
pub struct ContextBundle {
    /// The resolved agent definition.
    pub agent: Arc<AgentDefinition>,
    /// Rendered briefing text.
    pub instructions: String,
    /// Knowledge records retrieved for this bundle. Empty when the
    /// rendered briefing was served from the cache (the excerpts are
    /// already embedded in `instructions`).
    pub records: Vec<MemoryRecord>,
    /// Caller-supplied requirements.
    pub requirements: Vec<String>,
    /// Caller-supplied deliverables.
    pub deliverables: Vec<String>,
    /// Set when the knowledge store was unreachable, timed out, or the
    /// circuit breaker was open.
    pub memory_unavailable: bool,
}

/// Knowledge category consulted for a given agent kind.
fn knowledge_category(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Documentation | AgentKind::Research | AgentKind::Ticketing => "project",
        AgentKind::Engineer | AgentKind::DataEngineer => "pattern",
        AgentKind::Qa | AgentKind::Ops | AgentKind::Security => "error",
        AgentKind::VersionControl => "decision",
    }
}

/// Assembles context bundles for dispatches.
pub struct ContextPreparer {
    store: Option<Arc<dyn KnowledgeStore>>,
    breaker: CircuitBreaker,
    cache: Cache,
    timeout: Duration,
    record_limit: usize,
    project: String,
}

impl ContextPreparer {
    /// Create a preparer.
    ///
    /// `store` is the optional knowledge collaborator; `project` scopes
    /// retrieval queries; `timeout` and `record_limit` bound each lookup.
    pub fn new(
        store: Option<Arc<dyn KnowledgeStore>>,
        cache: Cache,
        project: impl Into<String>,
        timeout: Duration,
        record_limit: usize,
    ) -> Self {
        Self {
            store,
            breaker: CircuitBreaker::default(),
            cache,
            timeout,
            record_limit,
            project: project.into(),
        }
    }

    /// Prepare the context bundle for one dispatch. Never fails: knowledge
    /// outages degrade the bundle instead.
    pub fn prepare(&self, agent: &Arc<AgentDefinition>, request: &TaskRequest) -> ContextBundle {
        let cache_key = self.briefing_cache_key(agent, request);
        if let Some(CacheValue::Text(instructions)) = self.cache.get(&cache_key) {
            debug!(agent = %agent.name, "briefing served from cache");
            return ContextBundle {
                agent: agent.clone(),
                instructions,
                records: Vec::new(),
                requirements: request.requirements.clone(),
                deliverables: request.deliverables.clone(),
                memory_unavailable: false,
            };
        }

        let (records, memory_unavailable) = self.lookup_knowledge(agent, request);
        let instructions = self.render_instructions(agent, request, &records);

        if !memory_unavailable {
            self.cache
                .put(cache_key, CacheValue::Text(instructions.clone()));
        }

        ContextBundle {
            agent: agent.clone(),
            instructions,
            records,
            requirements: request.requirements.clone(),
            deliverables: request.deliverables.clone(),
            memory_unavailable,
        }
    }

    fn briefing_cache_key(&self, agent: &AgentDefinition, request: &TaskRequest) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(agent.content_hash.as_bytes());
        hasher.update(request.description.as_bytes());
        for requirement in &request.requirements {
            hasher.update(requirement.as_bytes());
        }
        for deliverable in &request.deliverables {
            hasher.update(deliverable.as_bytes());
        }
        format!(
            "{}{}",
            AgentDefinition::briefing_prefix(&agent.name),
            hasher.finalize().to_hex()
        )
    }

    /// Role-filtered, bounded, most-relevant-first knowledge lookup with a
    /// hard timeout. Returns the records and the degraded flag.
    fn lookup_knowledge(
        &self,
        agent: &AgentDefinition,
        request: &TaskRequest,
    ) -> (Vec<MemoryRecord>, bool) {
        let Some(store) = &self.store else {
            return (Vec::new(), true);
        };

        if !self.breaker.allow() {
            debug!(agent = %agent.name, "knowledge circuit open, skipping lookup");
            return (Vec::new(), true);
        }

        let query = KnowledgeQuery {
            category: knowledge_category(agent.kind).to_string(),
            project: self.project.clone(),
            query: request.description.clone(),
            tags: agent.specializations.clone(),
            limit: self.record_limit,
        };

        // The lookup runs on its own thread so a hung backend cannot block
        // dispatch past the timeout. A timed-out lookup thread is
        // abandoned; its late result is dropped with the channel.
        let (tx, rx) = mpsc::channel();
        let store = Arc::clone(store);
        std::thread::spawn(move || {
            let _ = tx.send(store.retrieve(&query));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(mut records)) => {
                self.breaker.record_success();
                records.truncate(self.record_limit);
                (records, false)
            }
            Ok(Err(err)) => {
                warn!(agent = %agent.name, error = %err, "knowledge lookup failed");
                self.breaker.record_failure();
                (Vec::new(), true)
            }
            Err(_) => {
                warn!(agent = %agent.name, timeout = ?self.timeout, "knowledge lookup timed out");
                self.breaker.record_failure();
                (Vec::new(), true)
            }
        }
    }

    fn render_instructions(
        &self,
        agent: &AgentDefinition,
        request: &TaskRequest,
        records: &[MemoryRecord],
    ) -> String {
        let mut variables = HashMap::new();
        variables.insert("description".to_string(), request.description.clone());
        variables.insert("agent_name".to_string(), agent.name.clone());
        variables.insert("agent_kind".to_string(), agent.kind.to_string());
        variables.insert("agent_description".to_string(), agent.description.clone());
        variables.insert(
            "requirements".to_string(),
            bullet_list(&request.requirements),
        );
        variables.insert(
            "deliverables".to_string(),
            bullet_list(&request.deliverables),
        );
        variables.insert("knowledge".to_string(), knowledge_section(records));

        match render_template(BRIEFING_TEMPLATE, &variables) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(error = %err, "briefing template failed to render, using plain fallback");
                format!(
                    "# Task: {}\n\nAgent: {} ({})\n",
                    request.description, agent.name, agent.kind
                )
            }
        }
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items
            .iter()
            .map(|item| format!("- {}", item))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn knowledge_section(records: &[MemoryRecord]) -> String {
    if records.is_empty() {
        "(none)".to_string()
    } else {
        records
            .iter()
            .map(|record| format!("- [{}] {}", record.category, record.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MusterError;
    use crate::hierarchy::Tier;
    use crate::knowledge::InMemoryKnowledgeStore;
    use tempfile::TempDir;

    fn test_agent(kind: AgentKind) -> Arc<AgentDefinition> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("agent.yaml");
        std::fs::write(
            &path,
            format!("name: test-agent\nkind: {}\nspecializations: [testing]\n", kind),
        )
        .unwrap();
        Arc::new(
            crate::definition::parse_definition(&path, Tier::Project).unwrap(),
        )
    }

    fn cache() -> Cache {
        Cache::new(Duration::from_secs(60), 1024 * 1024)
    }

    struct HangingStore;
    impl KnowledgeStore for HangingStore {
        fn retrieve(
            &self,
            _query: &KnowledgeQuery,
        ) -> crate::error::Result<Vec<MemoryRecord>> {
            std::thread::sleep(Duration::from_secs(5));
            Ok(Vec::new())
        }
    }

    struct FailingStore;
    impl KnowledgeStore for FailingStore {
        fn retrieve(
            &self,
            _query: &KnowledgeQuery,
        ) -> crate::error::Result<Vec<MemoryRecord>> {
            Err(MusterError::BackendUnavailable("backend down".to_string()))
        }
    }

    #[test]
    fn test_prepare_with_knowledge() {
        let store = InMemoryKnowledgeStore::with_records(vec![MemoryRecord {
            category: "error".to_string(),
            content: "flaky suite needs retries".to_string(),
            tags: Vec::new(),
            relevance: 1.0,
        }]);

        let preparer = ContextPreparer::new(
            Some(Arc::new(store)),
            cache(),
            "demo",
            Duration::from_secs(1),
            10,
        );
        let agent = test_agent(AgentKind::Qa);
        let request = TaskRequest {
            description: "flaky suite".to_string(),
            requirements: vec!["fix retries".to_string()],
            deliverables: vec!["green CI".to_string()],
            ..TaskRequest::default()
        };

        let bundle = preparer.prepare(&agent, &request);
        assert!(!bundle.memory_unavailable);
        assert_eq!(bundle.records.len(), 1);
        assert!(bundle.instructions.contains("# Task: flaky suite"));
        assert!(bundle.instructions.contains("- fix retries"));
        assert!(bundle.instructions.contains("flaky suite needs retries"));
    }

    #[test]
    fn test_prepare_without_store_is_degraded() {
        let preparer =
            ContextPreparer::new(None, cache(), "demo", Duration::from_secs(1), 10);
        let agent = test_agent(AgentKind::Engineer);
        let bundle = preparer.prepare(&agent, &TaskRequest::for_agent("test-agent", "work"));

        assert!(bundle.memory_unavailable);
        assert!(bundle.records.is_empty());
        assert!(bundle.instructions.contains("# Task: work"));
    }

    #[test]
    fn test_prepare_survives_lookup_timeout() {
        let preparer = ContextPreparer::new(
            Some(Arc::new(HangingStore)),
            cache(),
            "demo",
            Duration::from_millis(50),
            10,
        );
        let agent = test_agent(AgentKind::Qa);

        let start = std::time::Instant::now();
        let bundle = preparer.prepare(&agent, &TaskRequest::for_agent("test-agent", "work"));

        assert!(bundle.memory_unavailable);
        // The hung backend must not block dispatch for its full sleep.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_prepare_survives_backend_error() {
        let preparer = ContextPreparer::new(
            Some(Arc::new(FailingStore)),
            cache(),
            "demo",
            Duration::from_secs(1),
            10,
        );
        let agent = test_agent(AgentKind::Ops);
        let bundle = preparer.prepare(&agent, &TaskRequest::for_agent("test-agent", "work"));

        assert!(bundle.memory_unavailable);
        assert!(!bundle.instructions.is_empty());
    }

    #[test]
    fn test_breaker_opens_after_repeated_failures() {
        let preparer = ContextPreparer::new(
            Some(Arc::new(FailingStore)),
            cache(),
            "demo",
            Duration::from_secs(1),
            10,
        );
        let agent = test_agent(AgentKind::Ops);
        let request = TaskRequest::for_agent("test-agent", "work");

        for _ in 0..3 {
            preparer.prepare(&agent, &request);
        }
        assert!(preparer.breaker.is_open());

        // Further prepares still succeed, skipping the backend entirely.
        let bundle = preparer.prepare(&agent, &request);
        assert!(bundle.memory_unavailable);
    }

    #[test]
    fn test_record_limit_is_enforced() {
        let records: Vec<MemoryRecord> = (0..20)
            .map(|i| MemoryRecord {
                category: "error".to_string(),
                content: format!("record {}", i),
                tags: Vec::new(),
                relevance: f64::from(i),
            })
            .collect();
        let store = InMemoryKnowledgeStore::with_records(records);

        let preparer = ContextPreparer::new(
            Some(Arc::new(store)),
            cache(),
            "demo",
            Duration::from_secs(1),
            3,
        );
        let agent = test_agent(AgentKind::Qa);
        let bundle = preparer.prepare(&agent, &TaskRequest::for_agent("test-agent", "record"));

        assert_eq!(bundle.records.len(), 3);
        // Most relevant first.
        assert!(bundle.records[0].relevance >= bundle.records[1].relevance);
    }

    #[test]
    fn test_rendered_briefing_is_cached() {
        let store = InMemoryKnowledgeStore::with_records(vec![MemoryRecord {
            category: "error".to_string(),
            content: "cached knowledge".to_string(),
            tags: Vec::new(),
            relevance: 1.0,
        }]);
        let shared_cache = cache();
        let preparer = ContextPreparer::new(
            Some(Arc::new(store)),
            shared_cache.clone(),
            "demo",
            Duration::from_secs(1),
            10,
        );
        let agent = test_agent(AgentKind::Qa);
        let request = TaskRequest::for_agent("test-agent", "cached knowledge");

        let first = preparer.prepare(&agent, &request);
        assert!(!first.records.is_empty());

        let second = preparer.prepare(&agent, &request);
        assert_eq!(second.instructions, first.instructions);
        // Served from cache: excerpts live in the text, not the record list.
        assert!(second.records.is_empty());

        // Invalidation by briefing prefix forces a fresh render.
        shared_cache.invalidate(&AgentDefinition::briefing_prefix("test-agent"));
        let third = preparer.prepare(&agent, &request);
        assert!(!third.records.is_empty());
    }
}
