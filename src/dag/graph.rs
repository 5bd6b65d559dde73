// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::dag::flat::FlatGraph;
use crate::errors::{QueueError, Result};
use crate::job::{JobOptions, WorkDescriptor};

/// Handle on a node of a [`JobGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone)]
enum NodeKind {
    /// One job-to-be.
    Unit {
        work: WorkDescriptor,
        options: JobOptions,
    },
    /// Members run one after the other.
    Chain(Vec<NodeId>),
    /// Members are independent siblings.
    Group(Vec<NodeId>),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    /// Edges declared by this node, between nodes of any kind. They are
    /// expanded to unit edges (tail of source -> head of target) on flatten.
    edges: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Every node this one was connected to, in either direction.
    links: BTreeSet<NodeId>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            edges: BTreeMap::new(),
            links: BTreeSet::new(),
        }
    }
}

/// Build-time composition of jobs: units, chains and groups wired together
/// with [`on_done`](Self::on_done).
///
/// Nodes live in an arena and are never removed. Nothing is persisted until
/// the graph is handed to [`JobQueue::delay`](crate::queue::JobQueue::delay).
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    nodes: Vec<Node>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a unit: one job that will run `work`.
    pub fn delayable(&mut self, work: WorkDescriptor, options: JobOptions) -> NodeId {
        self.push(NodeKind::Unit { work, options })
    }

    /// Members depend on each other in order: `m1 -> m2 -> ... -> mn`.
    pub fn chain(&mut self, members: &[NodeId]) -> Result<NodeId> {
        self.check_members(members)?;
        let id = self.push(NodeKind::Chain(members.to_vec()));
        for pair in members.windows(2) {
            self.add_edge(id, pair[0], pair[1])?;
        }
        for member in members {
            self.link(id, *member);
        }
        Ok(id)
    }

    /// Members are independent; they start together and the group is done
    /// when all of them are.
    pub fn group(&mut self, members: &[NodeId]) -> Result<NodeId> {
        self.check_members(members)?;
        let id = self.push(NodeKind::Group(members.to_vec()));
        for member in members {
            self.link(id, *member);
        }
        Ok(id)
    }

    /// Run every target once `node` is done: each tail of `node` becomes a
    /// parent of each head of every target. For a group, that is every
    /// member.
    pub fn on_done(&mut self, node: NodeId, targets: &[NodeId]) -> Result<NodeId> {
        self.check_node(node)?;
        for target in targets {
            self.check_node(*target)?;
            self.add_edge(node, node, *target)?;
        }
        Ok(node)
    }

    /// Entry units of a node.
    pub fn head(&self, node: NodeId) -> Vec<NodeId> {
        self.boundary(node, true)
    }

    /// Exit units of a node.
    pub fn tail(&self, node: NodeId) -> Vec<NodeId> {
        self.boundary(node, false)
    }

    /// Work and options of a unit; `None` for chains and groups.
    pub fn unit(&self, node: NodeId) -> Option<(&WorkDescriptor, &JobOptions)> {
        match &self.nodes.get(node.0)?.kind {
            NodeKind::Unit { work, options } => Some((work, options)),
            _ => None,
        }
    }

    /// Merge everything connected to `node` into one graph of units.
    ///
    /// Node-local edges are expanded from the tail of their source to the
    /// head of their target. Each node is visited once.
    pub fn flatten(&self, node: NodeId) -> Result<FlatGraph> {
        self.check_node(node)?;
        let mut flat = FlatGraph::default();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([node]);

        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            let n = &self.nodes[current.0];
            if matches!(n.kind, NodeKind::Unit { .. }) {
                flat.add_vertex(current);
            }
            for (from, targets) in &n.edges {
                let tails = self.tail(*from);
                for target in targets {
                    for head in self.head(*target) {
                        for tail in &tails {
                            if *tail == head {
                                return Err(QueueError::SelfDependency(self.describe(head)));
                            }
                            flat.add_edge(*tail, head);
                        }
                    }
                }
            }
            queue.extend(n.links.iter().copied().filter(|id| !seen.contains(id)));
        }

        Ok(flat)
    }

    /// Human readable name of a node for errors and logs.
    pub fn describe(&self, node: NodeId) -> String {
        match self.nodes.get(node.0).map(|n| &n.kind) {
            Some(NodeKind::Unit { work, .. }) => format!("{}#{}", work.function, node.0),
            Some(NodeKind::Chain(_)) => format!("chain#{}", node.0),
            Some(NodeKind::Group(_)) => format!("group#{}", node.0),
            None => format!("unknown#{}", node.0),
        }
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(kind));
        id
    }

    /// Record `from -> to` in `owner`'s local graph and connect the nodes.
    fn add_edge(&mut self, owner: NodeId, from: NodeId, to: NodeId) -> Result<()> {
        if from == to {
            return Err(QueueError::SelfDependency(self.describe(from)));
        }
        self.nodes[owner.0].edges.entry(from).or_default().insert(to);
        self.link(owner, from);
        self.link(owner, to);
        self.link(from, to);
        Ok(())
    }

    fn link(&mut self, a: NodeId, b: NodeId) {
        if a != b {
            self.nodes[a.0].links.insert(b);
            self.nodes[b.0].links.insert(a);
        }
    }

    fn boundary(&self, node: NodeId, head: bool) -> Vec<NodeId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            match self.nodes.get(current.0).map(|n| &n.kind) {
                Some(NodeKind::Unit { .. }) => {
                    out.insert(current);
                }
                Some(NodeKind::Chain(members)) => {
                    let end = if head { members.first() } else { members.last() };
                    stack.extend(end.copied());
                }
                Some(NodeKind::Group(members)) => stack.extend(members.iter().copied()),
                None => {}
            }
        }
        out.into_iter().collect()
    }

    fn check_node(&self, node: NodeId) -> Result<()> {
        if node.0 >= self.nodes.len() {
            return Err(QueueError::ConfigError(format!(
                "node {} does not belong to this graph",
                node.0
            )));
        }
        Ok(())
    }

    fn check_members(&self, members: &[NodeId]) -> Result<()> {
        if members.is_empty() {
            return Err(QueueError::EmptyGraph);
        }
        members.iter().try_for_each(|member| self.check_node(*member))
    }
}
