//! Discovery hierarchy: tiers and the ordered directory index.
//!
//! Agent definitions are discovered across three tiers with fixed
//! precedence: project (the repository and each ancestor directory,
//! innermost first), then the user-level directory, then the system
//! directory. For a given agent name, the first tier encountered wins;
//! lower-precedence definitions are recorded as shadowed.

use crate::config::CoreConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One precedence level in the discovery hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Repository-local definitions (`.muster/agents/` in the repo and
    /// its ancestors). Highest precedence.
    Project,
    /// Per-user definitions in the platform config directory.
    User,
    /// Built-in or machine-wide definitions. Lowest precedence.
    System,
}

impl Tier {
    /// All tiers in precedence order (highest first).
    pub const ALL: [Tier; 3] = [Tier::Project, Tier::User, Tier::System];

    /// Precedence rank; lower wins.
    pub fn rank(self) -> u8 {
        match self {
            Tier::Project => 0,
            Tier::User => 1,
            Tier::System => 2,
        }
    }

    /// Stable string form used in cache keys and stats.
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Project => "project",
            Tier::User => "user",
            Tier::System => "system",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered list of directories to scan, built once at startup and
/// re-buildable on demand.
///
/// Entries appear in precedence order: scanning front to back and keeping
/// the first occurrence of each name implements the tier override rule.
#[derive(Debug, Clone)]
pub struct HierarchyIndex {
    entries: Vec<(Tier, PathBuf)>,
}

impl HierarchyIndex {
    /// Build the index starting from `start_dir`.
    ///
    /// Collects `.muster/agents` from `start_dir` and each ancestor
    /// (innermost first), then the user directory, then the system
    /// directory. Only directories that exist are included.
    pub fn build(start_dir: &Path, config: &CoreConfig) -> Self {
        let mut entries = Vec::new();

        let mut dir = Some(start_dir.to_path_buf());
        while let Some(current) = dir {
            let agents = current.join(".muster").join("agents");
            if agents.is_dir() {
                entries.push((Tier::Project, agents));
            }
            dir = current.parent().map(Path::to_path_buf);
        }

        if let Some(user_dir) = Self::user_agents_dir(config) {
            if user_dir.is_dir() {
                entries.push((Tier::User, user_dir));
            }
        }

        if let Some(system_dir) = Self::system_agents_dir(config) {
            if system_dir.is_dir() {
                entries.push((Tier::System, system_dir));
            }
        }

        Self { entries }
    }

    /// Build an index from explicit entries. Used by tests and by callers
    /// that manage their own directory layout.
    pub fn from_entries(entries: Vec<(Tier, PathBuf)>) -> Self {
        Self { entries }
    }

    fn user_agents_dir(config: &CoreConfig) -> Option<PathBuf> {
        if let Some(dir) = &config.user_agents_dir {
            return Some(dir.clone());
        }
        directories::ProjectDirs::from("", "", "muster")
            .map(|dirs| dirs.config_dir().join("agents"))
    }

    fn system_agents_dir(config: &CoreConfig) -> Option<PathBuf> {
        if let Some(dir) = &config.system_agents_dir {
            return Some(dir.clone());
        }
        std::env::var_os("MUSTER_SYSTEM_AGENTS").map(PathBuf::from)
    }

    /// Directories in precedence order.
    pub fn entries(&self) -> &[(Tier, PathBuf)] {
        &self.entries
    }

    /// Whether any tier directory is present at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the tier of a definition file path by longest matching
    /// indexed directory. Returns `None` for paths outside the hierarchy.
    pub fn tier_of(&self, path: &Path) -> Option<Tier> {
        self.entries
            .iter()
            .filter(|(_, dir)| path.starts_with(dir))
            .max_by_key(|(_, dir)| dir.components().count())
            .map(|(tier, _)| *tier)
    }
}
