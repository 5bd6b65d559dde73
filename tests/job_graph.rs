// tests/job_graph.rs

use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use jobqueue::dag::{ensure_same_graph_uuid, link_jobs, FlatGraph, JobGraph, NodeId};
use jobqueue::errors::QueueError;
use jobqueue::job::{Job, JobOptions, WorkDescriptor};
use jobqueue::types::JobState;
use uuid::Uuid;

fn unit(graph: &mut JobGraph, name: &str) -> NodeId {
    graph.delayable(WorkDescriptor::new(name), JobOptions::new())
}

fn edges(flat: &FlatGraph) -> BTreeSet<(NodeId, NodeId)> {
    flat.edges().into_iter().collect()
}

fn position(order: &[NodeId], node: NodeId) -> usize {
    order.iter().position(|n| *n == node).unwrap()
}

#[test]
fn chain_links_members_in_order() {
    let mut graph = JobGraph::new();
    let a = unit(&mut graph, "a");
    let b = unit(&mut graph, "b");
    let c = unit(&mut graph, "c");
    let chain = graph.chain(&[a, b, c]).unwrap();

    let flat = graph.flatten(chain).unwrap();

    assert_eq!(flat.len(), 3);
    assert_eq!(edges(&flat), BTreeSet::from([(a, b), (b, c)]));
    assert_eq!(flat.root_vertices(), vec![a]);
    assert_eq!(flat.topological_sort(), vec![a, b, c]);
}

#[test]
fn group_members_are_independent() {
    let mut graph = JobGraph::new();
    let a = unit(&mut graph, "a");
    let b = unit(&mut graph, "b");
    let group = graph.group(&[a, b]).unwrap();

    let flat = graph.flatten(group).unwrap();

    assert_eq!(flat.len(), 2);
    assert!(flat.edges().is_empty());
    assert_eq!(flat.root_vertices(), vec![a, b]);
}

#[test]
fn chain_of_groups_connects_every_tail_to_every_head() {
    // (a | b) -> (c | d) -> e
    let mut graph = JobGraph::new();
    let a = unit(&mut graph, "a");
    let b = unit(&mut graph, "b");
    let c = unit(&mut graph, "c");
    let d = unit(&mut graph, "d");
    let e = unit(&mut graph, "e");
    let first = graph.group(&[a, b]).unwrap();
    let second = graph.group(&[c, d]).unwrap();
    let chain = graph.chain(&[first, second, e]).unwrap();

    let flat = graph.flatten(chain).unwrap();

    assert_eq!(
        edges(&flat),
        BTreeSet::from([(a, c), (a, d), (b, c), (b, d), (c, e), (d, e)])
    );
    assert_eq!(graph.head(chain), vec![a, b]);
    assert_eq!(graph.tail(chain), vec![e]);
    assert_eq!(flat.parents(e), vec![c, d]);
}

#[test]
fn on_done_runs_targets_after_the_tail() {
    let mut graph = JobGraph::new();
    let a = unit(&mut graph, "a");
    let b = unit(&mut graph, "b");
    let c = unit(&mut graph, "c");
    let d = unit(&mut graph, "d");
    let chain = graph.chain(&[a, b]).unwrap();
    graph.on_done(chain, &[c, d]).unwrap();

    let flat = graph.flatten(a).unwrap();

    assert_eq!(flat.len(), 4);
    assert_eq!(edges(&flat), BTreeSet::from([(a, b), (b, c), (b, d)]));
}

#[test]
fn flatten_from_any_node_covers_the_whole_graph() {
    let mut graph = JobGraph::new();
    let a = unit(&mut graph, "a");
    let b = unit(&mut graph, "b");
    let c = unit(&mut graph, "c");
    graph.on_done(a, &[b]).unwrap();
    graph.on_done(b, &[c]).unwrap();

    let from_root = graph.flatten(a).unwrap();
    let from_leaf = graph.flatten(c).unwrap();

    assert_eq!(
        from_root.vertices().collect::<Vec<_>>(),
        from_leaf.vertices().collect::<Vec<_>>()
    );
    assert_eq!(edges(&from_root), edges(&from_leaf));
}

#[test]
fn unrelated_units_stay_out_of_the_flat_graph() {
    let mut graph = JobGraph::new();
    let a = unit(&mut graph, "a");
    let b = unit(&mut graph, "b");
    let lonely = unit(&mut graph, "lonely");
    graph.on_done(a, &[b]).unwrap();

    let flat = graph.flatten(a).unwrap();
    assert!(!flat.vertices().any(|v| v == lonely));
    assert_eq!(graph.flatten(lonely).unwrap().len(), 1);
}

#[test]
fn self_dependency_is_rejected() {
    let mut graph = JobGraph::new();
    let a = unit(&mut graph, "a");

    let err = graph.on_done(a, &[a]).unwrap_err();
    assert!(matches!(err, QueueError::SelfDependency(_)));
}

#[test]
fn empty_chain_is_rejected() {
    let mut graph = JobGraph::new();
    assert!(matches!(graph.chain(&[]), Err(QueueError::EmptyGraph)));
    assert!(matches!(graph.group(&[]), Err(QueueError::EmptyGraph)));
}

#[test]
fn node_from_another_graph_is_rejected() {
    let mut graph = JobGraph::new();
    let a = unit(&mut graph, "a");
    assert!(matches!(
        graph.on_done(a, &[NodeId(42)]),
        Err(QueueError::ConfigError(_))
    ));
}

#[test]
fn cycle_is_detected() {
    let mut graph = JobGraph::new();
    let a = unit(&mut graph, "a");
    let b = unit(&mut graph, "b");
    graph.on_done(a, &[b]).unwrap();
    graph.on_done(b, &[a]).unwrap();

    let flat = graph.flatten(a).unwrap();

    assert!(matches!(flat.check_acyclic(), Err(QueueError::DagCycle(_))));
    // vertices on the cycle never reach in-degree zero
    assert!(flat.topological_sort().is_empty());
}

#[test]
fn diamond_sorts_parents_before_children() {
    let mut graph = JobGraph::new();
    let top = unit(&mut graph, "top");
    let left = unit(&mut graph, "left");
    let right = unit(&mut graph, "right");
    let bottom = unit(&mut graph, "bottom");
    graph.on_done(top, &[left, right]).unwrap();
    graph.on_done(left, &[bottom]).unwrap();
    graph.on_done(right, &[bottom]).unwrap();

    let flat = graph.flatten(bottom).unwrap();
    flat.check_acyclic().unwrap();
    let order = flat.topological_sort();

    assert_eq!(order.len(), 4);
    for (parent, child) in flat.edges() {
        assert!(position(&order, parent) < position(&order, child));
    }
}

fn jobs(count: usize) -> Vec<Job> {
    (0..count)
        .map(|i| Job::new(WorkDescriptor::new(format!("job{i}")), &JobOptions::new(), Utc::now()))
        .collect()
}

#[test]
fn graph_uuid_is_shared_by_linked_jobs() {
    let mut jobs = jobs(3);
    ensure_same_graph_uuid(&mut jobs).unwrap();

    let graph_uuid = jobs[0].graph_uuid.expect("graph uuid assigned");
    assert!(jobs.iter().all(|job| job.graph_uuid == Some(graph_uuid)));
}

#[test]
fn existing_graph_uuid_is_reused() {
    let mut jobs = jobs(2);
    let existing = Uuid::new_v4();
    jobs[1].graph_uuid = Some(existing);

    ensure_same_graph_uuid(&mut jobs).unwrap();
    assert_eq!(jobs[0].graph_uuid, Some(existing));
}

#[test]
fn graph_uuid_rules_for_odd_inputs() {
    assert!(matches!(ensure_same_graph_uuid(&mut []), Err(QueueError::EmptyGraph)));

    let mut single = jobs(1);
    ensure_same_graph_uuid(&mut single).unwrap();
    assert_eq!(single[0].graph_uuid, None);

    single[0].graph_uuid = Some(Uuid::new_v4());
    assert!(matches!(
        ensure_same_graph_uuid(&mut single),
        Err(QueueError::SingleJobWithGraph(_))
    ));

    let mut mixed = jobs(2);
    mixed[0].graph_uuid = Some(Uuid::new_v4());
    mixed[1].graph_uuid = Some(Uuid::new_v4());
    assert!(matches!(ensure_same_graph_uuid(&mut mixed), Err(QueueError::MixedGraphs)));
}

#[test]
fn link_jobs_wires_both_directions() {
    let mut graph = JobGraph::new();
    let a = unit(&mut graph, "a");
    let b = unit(&mut graph, "b");
    graph.on_done(a, &[b]).unwrap();
    let flat = graph.flatten(a).unwrap();

    let mut jobs = jobs(2);
    let index = HashMap::from([(a, 0), (b, 1)]);
    link_jobs(&flat, &index, &mut jobs).unwrap();

    assert!(jobs[1].depends_on.contains(&jobs[0].uuid));
    assert!(jobs[0].reverse_depends_on.contains(&jobs[1].uuid));
    assert_eq!(jobs[0].state, JobState::Pending);
    assert_eq!(jobs[1].state, JobState::WaitDependencies);
}
