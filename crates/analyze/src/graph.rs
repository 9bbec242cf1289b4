//! Entity dependency graph and topological ordering.
//!
//! Nodes are arena indices into a name table rather than object
//! references, so cyclic inputs are representable without ceremony.
//! Ordering is Kahn's algorithm; ties among ready nodes are broken by
//! ascending name so a given batch always emits in the same order.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use sprocket_core::EntityDef;

/// Dependency resolution failure.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
pub enum ResolveError {
    /// The reference graph contains a cycle; `cycle` lists the nodes in
    /// walk order, first node repeated at the end.
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// Adjacency-list graph over a batch of entities.
#[derive(Debug)]
pub struct DepGraph {
    names: Vec<String>,
    /// `edges[i]` holds the indices that depend on node `i`.
    dependents: Vec<Vec<usize>>,
    /// Number of in-batch entities each node depends on.
    indegree: Vec<usize>,
}

impl DepGraph {
    /// Build the graph from declared references. References to entities
    /// outside the batch are treated as external and ignored here.
    pub fn build(entities: &[EntityDef]) -> Self {
        let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        let index: BTreeMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        let mut dependents = vec![Vec::new(); names.len()];
        let mut indegree = vec![0usize; names.len()];

        for (i, entity) in entities.iter().enumerate() {
            // De-dup so a doubly-declared reference counts once.
            let refs: BTreeSet<&usize> = entity
                .references
                .iter()
                .filter_map(|r| index.get(r))
                .collect();
            for &dep in refs {
                dependents[dep].push(i);
                indegree[i] += 1;
            }
        }

        DepGraph {
            names,
            dependents,
            indegree,
        }
    }

    /// Kahn's algorithm with name-ordered tie-breaking.
    pub fn topo_order(&self) -> Result<Vec<String>, ResolveError> {
        let mut indegree = self.indegree.clone();
        // Ready set keyed by name for deterministic pops.
        let mut ready: BTreeSet<(&str, usize)> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| (self.names[i].as_str(), i))
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(&(name, i)) = ready.iter().next() {
            ready.remove(&(name, i));
            order.push(name.to_string());
            for &next in &self.dependents[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    ready.insert((self.names[next].as_str(), next));
                }
            }
        }

        if order.len() < self.names.len() {
            return Err(ResolveError::CyclicDependency {
                cycle: self.find_cycle(&indegree),
            });
        }
        Ok(order)
    }

    /// Walk the leftover subgraph until a node repeats, then trim the
    /// path to the cycle proper so the error names exactly the loop.
    fn find_cycle(&self, indegree: &[usize]) -> Vec<String> {
        let remaining: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d > 0)
            .map(|(i, _)| i)
            .collect();

        // Invert edges: walk from a node to something it depends on.
        let mut depends_on: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &dep in &remaining {
            for &d in &self.dependents[dep] {
                if remaining.contains(&d) {
                    depends_on.entry(d).or_default().push(dep);
                }
            }
        }

        // Only reached when order.len() < names.len(), so the remaining
        // set is non-empty.
        let start = match remaining.iter().next() {
            Some(&i) => i,
            None => return Vec::new(),
        };
        let mut path = vec![start];
        let mut seen: BTreeMap<usize, usize> = BTreeMap::new();
        seen.insert(start, 0);
        let mut current = start;
        loop {
            let next = depends_on
                .get(&current)
                .and_then(|deps| deps.first())
                .copied();
            let next = match next {
                Some(n) => n,
                None => break,
            };
            if let Some(&pos) = seen.get(&next) {
                let mut cycle: Vec<String> = path[pos..]
                    .iter()
                    .map(|&i| self.names[i].clone())
                    .collect();
                cycle.push(self.names[next].clone());
                return cycle;
            }
            seen.insert(next, path.len());
            path.push(next);
            current = next;
        }

        path.iter().map(|&i| self.names[i].clone()).collect()
    }
}

/// Resolve the emission order for a batch of entities.
pub fn resolve_order(entities: &[EntityDef]) -> Result<Vec<String>, ResolveError> {
    DepGraph::build(entities).topo_order()
}
