// src/dag/flat.rs

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::graph::NodeId;
use crate::errors::{QueueError, Result};

/// A graph whose vertices are units only, as produced by
/// [`JobGraph::flatten`](crate::dag::JobGraph::flatten).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatGraph {
    vertices: BTreeSet<NodeId>,
    edges: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl FlatGraph {
    pub fn add_vertex(&mut self, vertex: NodeId) {
        self.vertices.insert(vertex);
    }

    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) {
        self.vertices.insert(parent);
        self.vertices.insert(child);
        self.edges.entry(parent).or_default().insert(child);
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Vertices in node order.
    pub fn vertices(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.vertices.iter().copied()
    }

    /// `(parent, child)` pairs.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.edges
            .iter()
            .flat_map(|(parent, children)| children.iter().map(move |child| (*parent, *child)))
            .collect()
    }

    pub fn children(&self, vertex: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges.get(&vertex).into_iter().flatten().copied()
    }

    pub fn parents(&self, vertex: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|(_, children)| children.contains(&vertex))
            .map(|(parent, _)| *parent)
            .collect()
    }

    /// Vertices without parent.
    pub fn root_vertices(&self) -> Vec<NodeId> {
        let with_parent: BTreeSet<NodeId> = self.edges.values().flatten().copied().collect();
        self.vertices
            .iter()
            .filter(|vertex| !with_parent.contains(vertex))
            .copied()
            .collect()
    }

    /// Kahn's algorithm. Vertices on a cycle are left out of the result.
    pub fn topological_sort(&self) -> Vec<NodeId> {
        let mut in_degree: BTreeMap<NodeId, usize> =
            self.vertices.iter().map(|vertex| (*vertex, 0)).collect();
        for child in self.edges.values().flatten() {
            *in_degree.entry(*child).or_default() += 1;
        }

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(vertex, _)| *vertex)
            .collect();
        let mut order = Vec::with_capacity(self.vertices.len());

        while let Some(vertex) = queue.pop_front() {
            order.push(vertex);
            for child in self.children(vertex) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }
        order
    }

    /// Reject graphs with a cycle.
    pub fn check_acyclic(&self) -> Result<()> {
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for vertex in &self.vertices {
            graph.add_node(vertex.0);
        }
        for (parent, child) in self.edges() {
            graph.add_edge(parent.0, child.0, ());
        }

        match toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => Err(QueueError::DagCycle(format!(
                "cycle detected in job graph involving node {}",
                cycle.node_id()
            ))),
        }
    }
}
