//! Agent registry: hierarchy resolution, classification, and discovery.
//!
//! The registry owns the authoritative map from name to effective
//! [`AgentDefinition`]. Discovery scans every tier directory in fixed
//! precedence order (project ancestors innermost-first, then user, then
//! system); for a given name the first tier encountered wins, and
//! lower-precedence definitions are recorded as shadowed rather than
//! discarded. Two definitions sharing a name at the *same* tier are a
//! conflict: the lexicographically first file is kept so discovery still
//! completes, and the conflict is surfaced in the discovery report.
//!
//! The map is protected by a reader/writer lock: reads do not block each
//! other, a write blocks new reads until complete. Lookups read through the
//! cache, so a definition whose file changed on disk after the watcher
//! invalidated its entry is re-read transparently.

mod query;


pub use query::{CapabilityMatch, RegistryStats};

use crate::cache::{Cache, CacheValue};
use crate::definition::store::DefinitionStore;
use crate::definition::AgentDefinition;
use crate::error::{MusterError, Result};
use crate::hierarchy::{HierarchyIndex, Tier};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A same-tier duplicate found during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConflict {
    /// Agent name both files declare.
    pub name: String,
    /// Tier at which the conflict occurred.
    pub tier: Tier,
    /// File kept (lexicographically first in scan order).
    pub kept: PathBuf,
    /// File ignored.
    pub ignored: PathBuf,
}

/// A change to one definition, as observed by the modification watcher.
#[derive(Debug)]
pub enum DefinitionChange {
    /// A definition file was created or its content replaced.
    Upserted(AgentDefinition),
    /// A definition file disappeared.
    Removed {
        /// Path of the removed file.
        path: PathBuf,
    },
}

/// Outcome of applying a [`DefinitionChange`].
///
/// Transitions follow the definition lifecycle
/// `Unseen -> Valid -> Updated -> Valid -> Removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A previously unseen definition became effective.
    Discovered,
    /// An effective definition was replaced by a newer version.
    Updated,
    /// The definition is valid but shadowed by a higher-precedence tier.
    Shadowed,
    /// The effective definition was removed.
    Removed,
    /// The change did not affect registry state.
    Ignored,
}

/// Resolves the hierarchy, classifies definitions, and answers queries.
pub struct Registry {
    store: DefinitionStore,
    cache: Cache,
    hierarchy: RwLock<HierarchyIndex>,
    definitions: RwLock<HashMap<String, Arc<AgentDefinition>>>,
    shadowed: RwLock<Vec<Arc<AgentDefinition>>>,
    conflicts: RwLock<Vec<DiscoveryConflict>>,
    last_discovery: RwLock<Option<Instant>>,
    discovery_ttl: Duration,
    min_score: u8,
}

impl Registry {
    /// Create a registry over the given hierarchy.
    ///
    /// `discovery_ttl` bounds how long a completed discovery is reused by
    /// non-forced calls; `min_score` is the low-confidence floor applied to
    /// query results.
    pub fn new(
        store: DefinitionStore,
        cache: Cache,
        hierarchy: HierarchyIndex,
        discovery_ttl: Duration,
        min_score: u8,
    ) -> Self {
        Self {
            store,
            cache,
            hierarchy: RwLock::new(hierarchy),
            definitions: RwLock::new(HashMap::new()),
            shadowed: RwLock::new(Vec::new()),
            conflicts: RwLock::new(Vec::new()),
            last_discovery: RwLock::new(None),
            discovery_ttl,
            min_score,
        }
    }

    /// The low-confidence score floor.
    pub fn min_score(&self) -> u8 {
        self.min_score
    }

    /// The cache shared with the watcher and context preparer.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Replace the hierarchy index (operator-triggered reload).
    pub fn rebuild_hierarchy(&self, index: HierarchyIndex) {
        *self.hierarchy.write() = index;
        *self.last_discovery.write() = None;
    }

    /// Resolve the tier of a path within the current hierarchy.
    pub fn tier_of(&self, path: &std::path::Path) -> Option<Tier> {
        self.hierarchy.read().tier_of(path)
    }

    /// Discover all agents across the hierarchy.
    ///
    /// Results of a recent discovery are reused unless `force_refresh` is
    /// set, which bypasses the discovery TTL and repopulates the cache.
    /// Repeated forced calls with no filesystem changes in between produce
    /// identical maps.
    pub fn discover_all(
        &self,
        force_refresh: bool,
    ) -> Result<HashMap<String, Arc<AgentDefinition>>> {
        if !force_refresh {
            let fresh = {
                let last = self.last_discovery.read();
                matches!(*last, Some(at) if at.elapsed() < self.discovery_ttl)
            };
            if fresh {
                return Ok(self.definitions.read().clone());
            }
        }

        let entries: Vec<(Tier, PathBuf)> = self.hierarchy.read().entries().to_vec();

        let previous = self.definitions.read().clone();
        let mut effective: HashMap<String, Arc<AgentDefinition>> = HashMap::new();
        let mut shadowed: Vec<Arc<AgentDefinition>> = Vec::new();
        let mut conflicts: Vec<DiscoveryConflict> = Vec::new();

        for (tier, dir) in &entries {
            let mut seen_in_dir: HashMap<String, PathBuf> = HashMap::new();

            for path in self.store.list_definition_files(dir) {
                let def = match self.store.read_definition(&path, *tier) {
                    Ok(def) => def,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unparseable definition");
                        // Keep the last known good version if this exact
                        // file was previously effective.
                        if let Some(prior) = previous
                            .values()
                            .find(|d| d.source_path == path)
                            .cloned()
                        {
                            if !effective.contains_key(&prior.name) {
                                effective.insert(prior.name.clone(), prior);
                            }
                        }
                        continue;
                    }
                };

                if let Some(kept) = seen_in_dir.get(&def.name) {
                    warn!(
                        name = %def.name,
                        tier = %tier,
                        ignored = %path.display(),
                        "conflicting definitions at the same tier"
                    );
                    conflicts.push(DiscoveryConflict {
                        name: def.name.clone(),
                        tier: *tier,
                        kept: kept.clone(),
                        ignored: path.clone(),
                    });
                    continue;
                }
                seen_in_dir.insert(def.name.clone(), path.clone());

                let def = Arc::new(def);
                if effective.contains_key(&def.name) {
                    debug!(name = %def.name, tier = %tier, "definition shadowed by higher tier");
                    shadowed.push(def);
                } else {
                    effective.insert(def.name.clone(), def);
                }
            }
        }

        for def in effective.values() {
            self.cache
                .put(def.cache_key(), CacheValue::Definition(def.clone()));
        }

        info!(
            agents = effective.len(),
            shadowed = shadowed.len(),
            conflicts = conflicts.len(),
            "discovery completed"
        );

        *self.definitions.write() = effective.clone();
        *self.shadowed.write() = shadowed;
        *self.conflicts.write() = conflicts;
        *self.last_discovery.write() = Some(Instant::now());

        Ok(effective)
    }

    /// Get the effective definition for an agent name.
    ///
    /// Reads through the cache: when the watcher (or TTL expiry) has
    /// invalidated the definition's entry, the source file is re-read so
    /// callers always observe on-disk mutations. A definition that fails
    /// to re-parse degrades to the last known good version; a definition
    /// whose file disappeared resolves to the next tier down, or
    /// [`MusterError::NotFound`].
    pub fn get_agent(&self, name: &str) -> Result<Arc<AgentDefinition>> {
        let current = self.definitions.read().get(name).cloned();
        let Some(def) = current else {
            return Err(MusterError::NotFound(name.to_string()));
        };

        if self.cache.get(&def.cache_key()).is_some() {
            return Ok(def);
        }

        if !def.source_path.exists() {
            let (_, promoted) = self.remove_effective(&def.source_path);
            return match promoted {
                Some(promoted) => Ok(promoted),
                None => Err(MusterError::NotFound(name.to_string())),
            };
        }

        match self.store.read_definition(&def.source_path, def.tier) {
            Ok(fresh) => {
                let fresh = Arc::new(fresh);
                self.definitions
                    .write()
                    .insert(fresh.name.clone(), fresh.clone());
                self.cache
                    .put(fresh.cache_key(), CacheValue::Definition(fresh.clone()));
                Ok(fresh)
            }
            Err(err) => {
                warn!(name = %name, error = %err, "re-read failed, keeping last known good definition");
                self.cache
                    .put(def.cache_key(), CacheValue::Definition(def.clone()));
                Ok(def)
            }
        }
    }

    /// Apply a change observed by the modification watcher.
    ///
    /// This is the only path that drives the definition state machine;
    /// the registry itself performs no polling.
    pub fn apply_change(&self, change: DefinitionChange) -> Transition {
        match change {
            DefinitionChange::Upserted(def) => self.apply_upsert(Arc::new(def)),
            DefinitionChange::Removed { path } => {
                let (removed, _) = self.remove_effective(&path);
                if removed {
                    Transition::Removed
                } else {
                    self.forget_shadowed(&path);
                    Transition::Ignored
                }
            }
        }
    }

    fn apply_upsert(&self, def: Arc<AgentDefinition>) -> Transition {
        // Locks are never nested here: the watcher is the single writer,
        // so the gap between the read and the write below is benign.
        let existing = self.definitions.read().get(&def.name).cloned();

        let transition = match existing {
            Some(existing) if def.tier.rank() > existing.tier.rank() => {
                // Lower precedence than the effective definition.
                let mut shadowed = self.shadowed.write();
                shadowed.retain(|d| d.source_path != def.source_path);
                shadowed.push(def);
                return Transition::Shadowed;
            }
            Some(existing) => {
                if existing.tier != def.tier {
                    // The old effective definition drops to shadowed.
                    self.shadowed.write().push(existing);
                }
                Transition::Updated
            }
            None => Transition::Discovered,
        };

        self.definitions.write().insert(def.name.clone(), def.clone());
        self.cache
            .put(def.cache_key(), CacheValue::Definition(def));
        transition
    }

    /// Remove the effective definition sourced from `path`, promoting the
    /// highest-precedence shadowed definition with the same name if any.
    ///
    /// Returns whether an effective definition was removed, and the
    /// promoted replacement if one existed.
    fn remove_effective(
        &self,
        path: &std::path::Path,
    ) -> (bool, Option<Arc<AgentDefinition>>) {
        let name = {
            let definitions = self.definitions.read();
            definitions
                .values()
                .find(|d| d.source_path == path)
                .map(|d| d.name.clone())
        };
        let Some(name) = name else {
            return (false, None);
        };

        self.definitions.write().remove(&name);
        (true, self.promote_shadowed(&name))
    }

    /// Drop a shadowed definition by path. Returns true when one matched.
    fn forget_shadowed(&self, path: &std::path::Path) -> bool {
        let mut shadowed = self.shadowed.write();
        let before = shadowed.len();
        shadowed.retain(|d| d.source_path != path);
        shadowed.len() != before
    }

    fn promote_shadowed(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        loop {
            let candidate = {
                let shadowed = self.shadowed.read();
                shadowed
                    .iter()
                    .filter(|d| d.name == name)
                    .min_by_key(|d| d.tier.rank())
                    .cloned()
            };
            let candidate = candidate?;

            self.shadowed
                .write()
                .retain(|d| d.source_path != candidate.source_path);

            // Re-read so the promoted version reflects current disk state.
            match self
                .store
                .read_definition(&candidate.source_path, candidate.tier)
            {
                Ok(fresh) => {
                    let fresh = Arc::new(fresh);
                    self.definitions
                        .write()
                        .insert(fresh.name.clone(), fresh.clone());
                    self.cache
                        .put(fresh.cache_key(), CacheValue::Definition(fresh.clone()));
                    info!(name = %name, tier = %fresh.tier, "promoted shadowed definition");
                    return Some(fresh);
                }
                Err(err) => {
                    warn!(name = %name, error = %err, "cannot promote shadowed definition");
                    continue;
                }
            }
        }
    }

    /// Snapshot of the effective definitions.
    pub fn snapshot(&self) -> HashMap<String, Arc<AgentDefinition>> {
        self.definitions.read().clone()
    }

    /// Shadowed definitions, sorted by name then tier precedence.
    pub fn shadowed(&self) -> Vec<Arc<AgentDefinition>> {
        let mut shadowed = self.shadowed.read().clone();
        shadowed.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.tier.rank().cmp(&b.tier.rank()))
        });
        shadowed
    }

    /// Same-tier conflicts found by the last discovery.
    pub fn conflicts(&self) -> Vec<DiscoveryConflict> {
        self.conflicts.read().clone()
    }
}
