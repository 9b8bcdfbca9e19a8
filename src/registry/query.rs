//! Registry query and stats operations.
//!
//! All queries operate on a snapshot of the effective definitions taken
//! under the read lock, so concurrent watcher writes never produce torn
//! results. Ordering is deterministic throughout: capability search ranks
//! by validation score descending with name ascending as tie-break.

use super::Registry;
use crate::definition::{AgentDefinition, AgentKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One capability-search result.
#[derive(Debug, Clone)]
pub struct CapabilityMatch {
    /// The matching definition.
    pub definition: Arc<AgentDefinition>,
    /// Whether the definition scored below the configured confidence floor.
    pub low_confidence: bool,
}

/// Aggregate registry counts.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    /// Effective agents.
    pub total: usize,
    /// Effective agents per primary kind.
    pub by_kind: BTreeMap<String, usize>,
    /// Effective agents per tier.
    pub by_tier: BTreeMap<String, usize>,
    /// Effective agents per declared specialization.
    pub by_specialization: BTreeMap<String, usize>,
    /// Agents declaring more than one kind.
    pub hybrid_count: usize,
    /// Agents below the confidence floor.
    pub low_confidence_count: usize,
    /// Definitions shadowed by a higher-precedence tier.
    pub shadowed_count: usize,
    /// Same-tier conflicts found by the last discovery.
    pub conflict_count: usize,
    /// Minimum validation score across effective agents.
    pub score_min: u8,
    /// Maximum validation score across effective agents.
    pub score_max: u8,
    /// Mean validation score across effective agents.
    pub score_avg: f64,
}

impl Registry {
    /// All effective definitions, sorted by name.
    pub fn list_all(&self) -> Vec<Arc<AgentDefinition>> {
        let mut agents: Vec<_> = self.snapshot().into_values().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    /// Effective definitions with the given primary kind.
    pub fn list_by_kind(&self, kind: AgentKind) -> Vec<Arc<AgentDefinition>> {
        self.list_all()
            .into_iter()
            .filter(|d| d.kind == kind)
            .collect()
    }

    /// Effective definitions declaring the given specialization
    /// (case-insensitive).
    pub fn list_by_specialization(&self, tag: &str) -> Vec<Arc<AgentDefinition>> {
        let tag = tag.to_lowercase();
        self.list_all()
            .into_iter()
            .filter(|d| d.specializations.iter().any(|s| s.to_lowercase() == tag))
            .collect()
    }

    /// Effective definitions declaring the given framework
    /// (case-insensitive).
    pub fn list_by_framework(&self, tag: &str) -> Vec<Arc<AgentDefinition>> {
        let tag = tag.to_lowercase();
        self.list_all()
            .into_iter()
            .filter(|d| d.frameworks.iter().any(|s| s.to_lowercase() == tag))
            .collect()
    }

    /// Effective definitions declaring the given domain (case-insensitive).
    pub fn list_by_domain(&self, tag: &str) -> Vec<Arc<AgentDefinition>> {
        let tag = tag.to_lowercase();
        self.list_all()
            .into_iter()
            .filter(|d| d.domains.iter().any(|s| s.to_lowercase() == tag))
            .collect()
    }

    /// Effective definitions spanning more than one kind.
    pub fn list_hybrid(&self) -> Vec<Arc<AgentDefinition>> {
        self.list_all()
            .into_iter()
            .filter(|d| d.is_hybrid())
            .collect()
    }

    /// Case-insensitive substring search over capability tags and
    /// descriptions.
    ///
    /// Results are ranked by validation score descending, ties broken by
    /// name ascending. Low-confidence definitions are flagged, not
    /// excluded.
    pub fn search_by_capability(&self, needle: &str) -> Vec<CapabilityMatch> {
        let min_score = self.min_score();
        let mut matches: Vec<CapabilityMatch> = self
            .snapshot()
            .into_values()
            .filter(|d| d.matches_capability(needle))
            .map(|definition| CapabilityMatch {
                low_confidence: definition.is_low_confidence(min_score),
                definition,
            })
            .collect();

        matches.sort_by(|a, b| {
            b.definition
                .validation_score
                .cmp(&a.definition.validation_score)
                .then_with(|| a.definition.name.cmp(&b.definition.name))
        });
        matches
    }

    /// Aggregate counts over the effective definitions.
    pub fn stats(&self) -> RegistryStats {
        let agents = self.list_all();
        let min_score = self.min_score();

        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_tier: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_specialization: BTreeMap<String, usize> = BTreeMap::new();
        let mut hybrid_count = 0;
        let mut low_confidence_count = 0;
        let mut score_min = 100u8;
        let mut score_max = 0u8;
        let mut score_sum = 0u64;

        for agent in &agents {
            *by_kind.entry(agent.kind.as_str().to_string()).or_default() += 1;
            *by_tier.entry(agent.tier.as_str().to_string()).or_default() += 1;
            for spec in &agent.specializations {
                *by_specialization.entry(spec.to_lowercase()).or_default() += 1;
            }
            if agent.is_hybrid() {
                hybrid_count += 1;
            }
            if agent.is_low_confidence(min_score) {
                low_confidence_count += 1;
            }
            score_min = score_min.min(agent.validation_score);
            score_max = score_max.max(agent.validation_score);
            score_sum += u64::from(agent.validation_score);
        }

        let total = agents.len();
        let score_avg = if total == 0 {
            0.0
        } else {
            score_sum as f64 / total as f64
        };
        if total == 0 {
            score_min = 0;
        }

        RegistryStats {
            total,
            by_kind,
            by_tier,
            by_specialization,
            hybrid_count,
            low_confidence_count,
            shadowed_count: self.shadowed().len(),
            conflict_count: self.conflicts().len(),
            score_min,
            score_max,
            score_avg,
        }
    }
}
