//! Definition file store.
//!
//! Scans tier directories for definition files and reads them into
//! [`AgentDefinition`]s. Parsing failures are reported per-file and never
//! abort a directory scan; callers skip-and-log offenders.

use super::{AgentDefinition, parse_definition};
use crate::error::Result;
use crate::hierarchy::Tier;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recognized definition file patterns.
const DEFINITION_PATTERNS: [&str; 2] = ["*.yaml", "*.yml"];

/// Reads agent definition files from configured directories.
#[derive(Debug, Clone)]
pub struct DefinitionStore {
    matcher: GlobSet,
}

impl DefinitionStore {
    /// Create a store with the default file-naming conventions.
    pub fn new() -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFINITION_PATTERNS {
            builder.add(Glob::new(pattern).expect("valid definition glob"));
        }
        Self {
            matcher: builder.build().expect("valid definition glob set"),
        }
    }

    /// Whether a path looks like a definition file.
    ///
    /// Hidden files and non-matching extensions are excluded.
    pub fn is_definition_file(&self, path: &Path) -> bool {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        !file_name.starts_with('.') && self.matcher.is_match(file_name)
    }

    /// List definition files under a tier directory.
    ///
    /// Recurses into subdirectories (agents may be grouped by category).
    /// The result is sorted for deterministic scan order; with same-tier
    /// duplicates, the lexicographically first file wins and the rest are
    /// reported as conflicts.
    pub fn list_definition_files(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.is_definition_file(path))
            .collect();

        files.sort();
        files
    }

    /// Read and parse one definition file.
    pub fn read_definition(&self, path: &Path, tier: Tier) -> Result<AgentDefinition> {
        parse_definition(path, tier)
    }
}

impl Default for DefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}
