// src/dag/mod.rs

//! Job dependency graphs.
//!
//! - [`graph`] is the build-time composition arena (units, chains, groups,
//!   `on_done` edges).
//! - [`flat`] holds the flattened unit-only graph and its topological sort.
//! - [`link`] turns a flat graph into linked jobs sharing a graph uuid.

pub mod flat;
pub mod graph;
pub mod link;

pub use flat::FlatGraph;
pub use graph::{JobGraph, NodeId};
pub use link::{ensure_same_graph_uuid, link_jobs};
