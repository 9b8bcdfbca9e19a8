//! Knowledge-store collaborator boundary.
//!
//! The long-term memory store is an external collaborator: the core only
//! depends on the [`KnowledgeStore`] trait and treats every lookup as
//! best-effort enrichment. Backend failures are tracked by an explicit
//! [`CircuitBreaker`] value object evaluated before each call, so outages
//! never turn into exception-driven control flow or blocked dispatches.

use crate::error::{MusterError, Result};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// One record retrieved from the knowledge store.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    /// Record category (e.g. "pattern", "error", "decision", "project").
    pub category: String,
    /// Record content.
    pub content: String,
    /// Tags attached to the record.
    pub tags: Vec<String>,
    /// Backend-assigned relevance; higher is more relevant.
    pub relevance: f64,
}

/// Query shape for knowledge retrieval.
#[derive(Debug, Clone)]
pub struct KnowledgeQuery {
    /// Category to retrieve from.
    pub category: String,
    /// Project scope.
    pub project: String,
    /// Free-text query.
    pub query: String,
    /// Tag filter; empty matches all.
    pub tags: Vec<String>,
    /// Maximum records to return.
    pub limit: usize,
}

/// External knowledge store. Implementations must be cheap to call from
/// worker threads; the preparer enforces its own timeout around each call.
pub trait KnowledgeStore: Send + Sync {
    /// Retrieve up to `query.limit` records, most relevant first.
    fn retrieve(&self, query: &KnowledgeQuery) -> Result<Vec<MemoryRecord>>;
}

#[derive(Debug)]
struct BreakerState {
    failures: u32,
    last_failure: Option<Instant>,
    open: bool,
}

/// Explicit circuit breaker guarding knowledge-store calls.
///
/// Opens after `failure_threshold` consecutive failures; after
/// `reset_after` has elapsed the next call is allowed through as a probe,
/// and a success closes the circuit again.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_after: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker with the given threshold and reset window.
    pub fn new(failure_threshold: u32, reset_after: Duration) -> Self {
        Self {
            failure_threshold,
            reset_after,
            state: Mutex::new(BreakerState {
                failures: 0,
                last_failure: None,
                open: false,
            }),
        }
    }

    /// Whether a call should be attempted now.
    pub fn allow(&self) -> bool {
        let state = self.state.lock();
        if !state.open {
            return true;
        }
        match state.last_failure {
            Some(at) => at.elapsed() >= self.reset_after,
            None => true,
        }
    }

    /// Whether the circuit is currently open.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Record a successful call; closes the circuit.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.failures = 0;
        state.last_failure = None;
        state.open = false;
    }

    /// Record a failed call; opens the circuit past the threshold.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failures += 1;
        state.last_failure = Some(Instant::now());
        if state.failures >= self.failure_threshold {
            state.open = true;
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

/// In-memory knowledge store. Used by tests and as the demo backend when
/// no external store is wired up.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeStore {
    records: Vec<MemoryRecord>,
}

impl InMemoryKnowledgeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with records.
    pub fn with_records(records: Vec<MemoryRecord>) -> Self {
        Self { records }
    }

    /// Add a record.
    pub fn insert(&mut self, record: MemoryRecord) {
        self.records.push(record);
    }
}

impl KnowledgeStore for InMemoryKnowledgeStore {
    fn retrieve(&self, query: &KnowledgeQuery) -> Result<Vec<MemoryRecord>> {
        if query.limit == 0 {
            return Err(MusterError::BackendUnavailable(
                "retrieval limit must be greater than 0".to_string(),
            ));
        }

        let needle = query.query.to_lowercase();
        let mut matches: Vec<MemoryRecord> = self
            .records
            .iter()
            .filter(|r| r.category == query.category)
            .filter(|r| {
                query.tags.is_empty() || r.tags.iter().any(|t| query.tags.contains(t))
            })
            .filter(|r| needle.is_empty() || r.content.to_lowercase().contains(&needle))
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(query.limit);
        Ok(matches)
    }
}
