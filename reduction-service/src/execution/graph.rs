// Reduction Graph (DAG) Builder
// Resolves `source` references into a deterministic evaluation order

use crate::definition::ReductionSet;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
    /// Nodes involved: the cycle members, or the unresolved reference
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular `source` references
    Cycle,
    /// `source` names a node that does not exist
    UnknownSource,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn cycle(nodes: Vec<String>) -> Self {
        Self {
            message: format!("circular source references: {}", nodes.join(" -> ")),
            kind: GraphErrorKind::Cycle,
            nodes,
        }
    }

    pub fn unknown_source(node: &str, source: &str) -> Self {
        Self {
            message: format!("node '{}' has unknown source '{}'", node, source),
            kind: GraphErrorKind::UnknownSource,
            nodes: vec![source.to_string()],
        }
    }
}

/// Dependency graph over a reduction set
///
/// Node indices are declaration indices in the set.
#[derive(Debug, Clone)]
pub struct ReductionGraph {
    names: Vec<String>,
    /// Upstream node of each node
    sources: Vec<Option<usize>>,
    /// Downstream nodes of each node, in declaration order
    dependents: Vec<Vec<usize>>,
    /// Topological order, ties broken by declaration order
    order: Vec<usize>,
}

impl ReductionGraph {
    /// Build and validate the graph of a reduction set
    pub fn build(set: &ReductionSet) -> Result<Self, GraphError> {
        let names: Vec<String> = set.iter().map(|n| n.name.clone()).collect();
        let mut sources = Vec::with_capacity(names.len());
        let mut dependents = vec![Vec::new(); names.len()];

        for (idx, node) in set.iter().enumerate() {
            let source = match &node.source {
                Some(source) => {
                    let upstream = set
                        .index_of(source)
                        .ok_or_else(|| GraphError::unknown_source(&node.name, source))?;
                    dependents[upstream].push(idx);
                    Some(upstream)
                }
                None => None,
            };
            sources.push(source);
        }

        let mut graph = Self {
            names,
            sources,
            dependents,
            order: Vec::new(),
        };

        graph.detect_cycles()?;
        graph.order = graph.topological_order();

        Ok(graph)
    }

    /// Detect cycles using DFS
    fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        for idx in 0..self.names.len() {
            if !visited.contains(&idx) {
                if let Some(cycle) = self.dfs_cycle(idx, &mut visited, &mut stack) {
                    return Err(GraphError::cycle(
                        cycle.into_iter().map(|i| self.names[i].clone()).collect(),
                    ));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        idx: usize,
        visited: &mut HashSet<usize>,
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        visited.insert(idx);
        stack.push(idx);

        if let Some(dep) = self.sources[idx] {
            if let Some(pos) = stack.iter().position(|&s| s == dep) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
            if !visited.contains(&dep) {
                if let Some(cycle) = self.dfs_cycle(dep, visited, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        None
    }

    /// Kahn's algorithm with a min-heap on declaration index
    fn topological_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self
            .sources
            .iter()
            .map(|s| usize::from(s.is_some()))
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &dependent in &self.dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        order
    }

    /// Evaluation order as node indices
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Evaluation order as node names
    pub fn ordered_names(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn source(&self, idx: usize) -> Option<usize> {
        self.sources[idx]
    }

    pub fn dependents(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The given nodes plus everything they transitively depend on
    pub fn with_dependencies(&self, roots: &[usize]) -> Vec<bool> {
        let mut selected = vec![false; self.names.len()];
        for &root in roots {
            let mut current = Some(root);
            while let Some(idx) = current {
                if selected[idx] {
                    break;
                }
                selected[idx] = true;
                current = self.sources[idx];
            }
        }
        selected
    }
}
