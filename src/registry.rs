//! Startup-time registry of named tasks and their declared dependencies.
//!
//! Tasks are plain values, so nothing in the language stops two of them from
//! depending on each other through their closures. Applications declare the
//! dependency edges here while wiring tasks up during initialization and
//! call [`TaskRegistry::validate`] before serving, which fails fast on a
//! cycle instead of deadlocking a request later.
use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::RegistryError;

#[derive(Debug, Default)]
pub struct TaskRegistry {
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a task by name. Names must be unique.
    pub fn declare(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.indices.contains_key(name) {
            return Err(RegistryError::DuplicateTask(name.to_string()));
        }
        let index = self.graph.add_node(name.to_string());
        self.indices.insert(name.to_string(), index);
        Ok(())
    }

    /// Declare that `task` calls `dep` at runtime. Both must be declared.
    pub fn depends_on(&mut self, task: &str, dep: &str) -> Result<(), RegistryError> {
        let task = self.lookup(task)?;
        let dep = self.lookup(dep)?;
        self.graph.add_edge(dep, task, ());
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<NodeIndex, RegistryError> {
        self.indices
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnknownTask(name.to_string()))
    }

    /// Topological pass over the declared edges; errs on a cycle, naming one
    /// of the tasks involved.
    pub fn validate(&self) -> Result<(), RegistryError> {
        self.order().map(|_| ())
    }

    /// A valid initialization order (dependencies first).
    pub fn order(&self) -> Result<Vec<&str>, RegistryError> {
        match toposort(&self.graph, None) {
            Ok(sorted) => Ok(sorted
                .into_iter()
                .map(|index| self.graph[index].as_str())
                .collect()),
            Err(cycle) => Err(RegistryError::Cycle(self.graph[cycle.node_id()].clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_respects_dependencies() {
        let mut registry = TaskRegistry::new();
        registry.declare("auth").unwrap();
        registry.declare("session").unwrap();
        registry.declare("profile").unwrap();
        registry.depends_on("auth", "session").unwrap();
        registry.depends_on("profile", "auth").unwrap();

        let order = registry.order().unwrap();
        let pos = |name| order.iter().position(|&n| n == name).unwrap();
        assert!(pos("session") < pos("auth"));
        assert!(pos("auth") < pos("profile"));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut registry = TaskRegistry::new();
        registry.declare("a").unwrap();
        registry.declare("b").unwrap();
        registry.depends_on("a", "b").unwrap();
        registry.depends_on("b", "a").unwrap();

        let err = registry.validate().unwrap_err();
        assert!(matches!(err, RegistryError::Cycle(_)));
    }

    #[test]
    fn test_duplicate_and_unknown_names() {
        let mut registry = TaskRegistry::new();
        registry.declare("a").unwrap();
        assert!(matches!(
            registry.declare("a"),
            Err(RegistryError::DuplicateTask(_))
        ));
        assert!(matches!(
            registry.depends_on("a", "missing"),
            Err(RegistryError::UnknownTask(_))
        ));
    }
}
