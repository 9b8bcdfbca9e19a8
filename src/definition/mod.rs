//! Agent definition model.
//!
//! An [`AgentDefinition`] is an immutable snapshot of one agent's declared
//! identity: name, primary kind, optional hybrid kinds, free-text
//! specializations, frameworks, domains, roles, capability tags, complexity
//! tier, and the execution command. Definitions are parsed from YAML files
//! discovered across the tier hierarchy; unknown fields are preserved but
//! ignored by validation scoring.

mod parse;
mod scoring;
pub mod store;


pub use parse::{logical_name_from_filename, parse_definition};
pub use scoring::validation_score;

use crate::hierarchy::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

/// Core agent kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Documentation authoring and maintenance.
    Documentation,
    /// Ticket triage and tracking.
    Ticketing,
    /// Version-control operations.
    VersionControl,
    /// Quality assurance and test execution.
    Qa,
    /// Research and investigation.
    Research,
    /// Operations and deployment.
    Ops,
    /// Security review and hardening.
    Security,
    /// General engineering work.
    Engineer,
    /// Data pipelines and analysis.
    DataEngineer,
}

impl AgentKind {
    /// All core kinds.
    pub const ALL: [AgentKind; 9] = [
        AgentKind::Documentation,
        AgentKind::Ticketing,
        AgentKind::VersionControl,
        AgentKind::Qa,
        AgentKind::Research,
        AgentKind::Ops,
        AgentKind::Security,
        AgentKind::Engineer,
        AgentKind::DataEngineer,
    ];

    /// Stable string form used in stats, cache keys, and CLI filters.
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Documentation => "documentation",
            AgentKind::Ticketing => "ticketing",
            AgentKind::VersionControl => "version_control",
            AgentKind::Qa => "qa",
            AgentKind::Research => "research",
            AgentKind::Ops => "ops",
            AgentKind::Security => "security",
            AgentKind::Engineer => "engineer",
            AgentKind::DataEngineer => "data_engineer",
        }
    }

    /// Parse a kind from its stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared complexity tier of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    /// Single-purpose agents with a narrow contract.
    #[default]
    Basic,
    /// Agents covering a broader slice of one kind.
    Intermediate,
    /// Multi-step agents with internal decision-making.
    Advanced,
    /// Cross-cutting agents spanning several kinds.
    Expert,
}

impl ComplexityTier {
    /// Stable string form.
    pub fn as_str(self) -> &'static str {
        match self {
            ComplexityTier::Basic => "basic",
            ComplexityTier::Intermediate => "intermediate",
            ComplexityTier::Advanced => "advanced",
            ComplexityTier::Expert => "expert",
        }
    }
}

/// Lifecycle state of a definition as driven by the modification watcher.
///
/// `Unseen -> Valid -> Updated -> Valid -> Removed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionState {
    /// Not yet discovered.
    Unseen,
    /// Discovered and accepted.
    Valid,
    /// A newer version replaced a previously accepted one.
    Updated,
    /// The file disappeared or was withdrawn.
    Removed,
}

/// Immutable snapshot of one agent's declared identity.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDefinition {
    /// Unique name within a tier.
    pub name: String,
    /// Primary kind.
    pub kind: AgentKind,
    /// Additional kinds for hybrid agents.
    pub hybrid_kinds: Vec<AgentKind>,
    /// Free-text description.
    pub description: String,
    /// Free-text specializations (e.g. "ui_ux", "database").
    pub specializations: Vec<String>,
    /// Declared frameworks/technologies.
    pub frameworks: Vec<String>,
    /// Declared domains (e.g. "finance", "healthcare").
    pub domains: Vec<String>,
    /// Declared roles.
    pub roles: Vec<String>,
    /// Capability tags matched by capability search.
    pub capabilities: Vec<String>,
    /// Declared complexity tier.
    pub complexity: ComplexityTier,
    /// Command template executed inside the isolated working path.
    pub command: Option<String>,
    /// Per-agent execution timeout override in seconds.
    pub timeout_seconds: Option<u64>,
    /// Environment variables set for the agent process.
    pub environment: HashMap<String, String>,
    /// Deterministic completeness score, 0-100.
    pub validation_score: u8,
    /// Tier the definition was discovered at.
    pub tier: Tier,
    /// Source file path.
    pub source_path: PathBuf,
    /// Last-modified timestamp of the source file.
    pub modified: DateTime<Utc>,
    /// Hex-encoded content hash of the source file.
    pub content_hash: String,
    /// Unknown fields preserved for forward compatibility; ignored by scoring.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl AgentDefinition {
    /// Whether this definition spans more than one kind.
    pub fn is_hybrid(&self) -> bool {
        !self.hybrid_kinds.is_empty()
    }

    /// Whether the definition falls below the configured confidence floor.
    pub fn is_low_confidence(&self, min_score: u8) -> bool {
        self.validation_score < min_score
    }

    /// Cache key for this exact version of the definition.
    pub fn cache_key(&self) -> String {
        format!("agent:{}:{}:{}", self.name, self.tier, self.content_hash)
    }

    /// Cache key prefix covering every version of a named definition.
    pub fn cache_prefix(name: &str) -> String {
        format!("agent:{}:", name)
    }

    /// Cache key prefix covering rendered briefings for a named definition.
    pub fn briefing_prefix(name: &str) -> String {
        format!("briefing:{}:", name)
    }

    /// Case-insensitive substring match over capability tags and the
    /// description.
    pub fn matches_capability(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.capabilities
            .iter()
            .any(|cap| cap.to_lowercase().contains(&needle))
            || self.description.to_lowercase().contains(&needle)
    }

    /// Effective execution timeout, falling back to the given default.
    pub fn effective_timeout(&self, default_seconds: u64) -> u64 {
        self.timeout_seconds.unwrap_or(default_seconds)
    }
}

/// Raw definition file schema as deserialized from YAML, before metadata
/// (tier, path, hash, score) is attached.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawDefinition {
    /// Unique agent name. Required.
    pub name: String,
    /// Primary kind. Required.
    pub kind: Option<AgentKind>,
    /// Additional kinds for hybrid agents.
    pub hybrid_kinds: Vec<AgentKind>,
    /// Free-text description.
    pub description: String,
    /// Free-text specializations.
    pub specializations: Vec<String>,
    /// Declared frameworks/technologies.
    pub frameworks: Vec<String>,
    /// Declared domains.
    pub domains: Vec<String>,
    /// Declared roles.
    pub roles: Vec<String>,
    /// Capability tags.
    pub capabilities: Vec<String>,
    /// Declared complexity tier.
    pub complexity: ComplexityTier,
    /// Command template.
    pub command: Option<String>,
    /// Execution timeout override in seconds.
    pub timeout_seconds: Option<u64>,
    /// Environment variables for the agent process.
    pub environment: HashMap<String, String>,
    /// Unknown fields preserved for forward compatibility.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}
