//! Dependency graph for component startup ordering.
//!
//! An explicit directed-acyclic-graph structure with cycle detection
//! returning a typed error. Used by the runtime to derive the order in
//! which core components start; task execution never goes through this
//! graph (independent tasks are unordered by design).

use std::collections::HashMap;
use thiserror::Error;

/// Errors from graph construction and ordering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// An edge references a node that was never added.
    #[error("unknown node '{0}' in dependency edge")]
    UnknownNode(String),

    /// The graph contains a dependency cycle.
    #[error("dependency cycle involving '{0}'")]
    Cycle(String),
}

/// A directed acyclic dependency graph over string-named nodes.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Nodes in insertion order (keeps ordering deterministic).
    nodes: Vec<String>,
    /// node -> nodes it depends on.
    dependencies: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Adding twice is a no-op.
    pub fn add_node(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.nodes.contains(&name) {
            self.nodes.push(name.clone());
            self.dependencies.entry(name).or_default();
        }
    }

    /// Declare that `node` depends on `dependency` (the dependency must
    /// start first).
    pub fn depends_on(
        &mut self,
        node: impl AsRef<str>,
        dependency: impl AsRef<str>,
    ) -> Result<(), GraphError> {
        let node = node.as_ref();
        let dependency = dependency.as_ref();

        if !self.nodes.iter().any(|n| n == node) {
            return Err(GraphError::UnknownNode(node.to_string()));
        }
        if !self.nodes.iter().any(|n| n == dependency) {
            return Err(GraphError::UnknownNode(dependency.to_string()));
        }

        let deps = self
            .dependencies
            .entry(node.to_string())
            .or_default();
        if !deps.iter().any(|d| d == dependency) {
            deps.push(dependency.to_string());
        }
        Ok(())
    }

    /// Compute a startup order: every node appears after all of its
    /// dependencies. The order is deterministic (Kahn's algorithm over
    /// insertion order).
    pub fn start_order(&self) -> Result<Vec<String>, GraphError> {
        let mut remaining_deps: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.dependencies[n].len()))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while order.len() < self.nodes.len() {
            let next = self.nodes.iter().find(|n| {
                remaining_deps.get(n.as_str()) == Some(&0) && !order.contains(*n)
            });

            let Some(next) = next else {
                // Every unordered node still has unmet dependencies.
                let stuck = self
                    .nodes
                    .iter()
                    .find(|n| !order.contains(*n))
                    .map(|n| n.clone())
                    .unwrap_or_default();
                return Err(GraphError::Cycle(stuck));
            };

            order.push(next.clone());
            for (node, deps) in &self.dependencies {
                if deps.iter().any(|d| d == next) {
                    if let Some(count) = remaining_deps.get_mut(node.as_str()) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_chain() {
        let mut graph = DependencyGraph::new();
        graph.add_node("cache");
        graph.add_node("registry");
        graph.add_node("orchestrator");
        graph.depends_on("registry", "cache").unwrap();
        graph.depends_on("orchestrator", "registry").unwrap();

        assert_eq!(
            graph.start_order().unwrap(),
            vec!["cache", "registry", "orchestrator"]
        );
    }

    #[test]
    fn test_diamond_is_deterministic() {
        let mut graph = DependencyGraph::new();
        graph.add_node("store");
        graph.add_node("cache");
        graph.add_node("watcher");
        graph.add_node("registry");
        graph.depends_on("watcher", "store").unwrap();
        graph.depends_on("watcher", "cache").unwrap();
        graph.depends_on("registry", "watcher").unwrap();

        let order = graph.start_order().unwrap();
        assert_eq!(order, vec!["store", "cache", "watcher", "registry"]);
        for _ in 0..5 {
            assert_eq!(graph.start_order().unwrap(), order);
        }
    }

    #[test]
    fn test_cycle_is_typed_error() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a");
        graph.add_node("b");
        graph.depends_on("a", "b").unwrap();
        graph.depends_on("b", "a").unwrap();

        let err = graph.start_order().unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn test_self_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a");
        graph.depends_on("a", "a").unwrap();

        assert!(matches!(graph.start_order(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_unknown_node_edge() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a");

        let err = graph.depends_on("a", "missing").unwrap_err();
        assert_eq!(err, GraphError::UnknownNode("missing".to_string()));

        let err = graph.depends_on("missing", "a").unwrap_err();
        assert_eq!(err, GraphError::UnknownNode("missing".to_string()));
    }

    #[test]
    fn test_duplicate_nodes_and_edges_are_noops() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a");
        graph.add_node("a");
        graph.add_node("b");
        graph.depends_on("b", "a").unwrap();
        graph.depends_on("b", "a").unwrap();

        assert_eq!(graph.start_order().unwrap(), vec!["a", "b"]);
    }
}
