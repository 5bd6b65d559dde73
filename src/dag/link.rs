// src/dag/link.rs

use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;

use crate::dag::flat::FlatGraph;
use crate::dag::graph::NodeId;
use crate::errors::{QueueError, Result};
use crate::job::Job;

/// Give every job of a graph the same graph uuid.
///
/// A lone job must not carry one. For several jobs, an existing graph uuid
/// is reused; jobs from two different graphs cannot be mixed.
pub fn ensure_same_graph_uuid(jobs: &mut [Job]) -> Result<()> {
    match jobs {
        [] => Err(QueueError::EmptyGraph),
        [job] => match job.graph_uuid {
            Some(_) => Err(QueueError::SingleJobWithGraph(job.uuid)),
            None => Ok(()),
        },
        _ => {
            let existing: BTreeSet<Uuid> = jobs.iter().filter_map(|job| job.graph_uuid).collect();
            if existing.len() > 1 {
                return Err(QueueError::MixedGraphs);
            }
            let graph_uuid = existing.into_iter().next().unwrap_or_else(Uuid::new_v4);
            for job in jobs.iter_mut() {
                job.graph_uuid = Some(graph_uuid);
            }
            Ok(())
        }
    }
}

/// Wire `add_depends` along every edge of `flat`.
///
/// `index` maps each vertex to its job in `jobs`.
pub fn link_jobs(flat: &FlatGraph, index: &HashMap<NodeId, usize>, jobs: &mut [Job]) -> Result<()> {
    for (parent, child) in flat.edges() {
        let (Some(&p), Some(&c)) = (index.get(&parent), index.get(&child)) else {
            continue;
        };
        let (parent_job, child_job) = pair_mut(jobs, p, c)?;
        child_job.add_depends([parent_job])?;
    }
    Ok(())
}

fn pair_mut(jobs: &mut [Job], a: usize, b: usize) -> Result<(&mut Job, &mut Job)> {
    if a == b {
        return Err(QueueError::SelfDependency(jobs[a].uuid.to_string()));
    }
    if a < b {
        let (left, right) = jobs.split_at_mut(b);
        Ok((&mut left[a], &mut right[0]))
    } else {
        let (left, right) = jobs.split_at_mut(a);
        Ok((&mut right[0], &mut left[b]))
    }
}
