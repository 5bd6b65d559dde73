// src/queue.rs

//! Caller-facing API: delay job graphs and act on stored jobs.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dag::{ensure_same_graph_uuid, link_jobs, JobGraph, NodeId};
use crate::errors::{QueueError, Result};
use crate::exec::{enqueue_waiting, ConflictRetry};
use crate::job::{FunctionRegistry, Job, JobOptions};
use crate::store::JobStore;
use crate::types::JobState;

/// Jobs created (or found) by [`JobQueue::delay`], in node order.
#[derive(Debug, Clone)]
pub struct DelayOutcome {
    pub jobs: Vec<Job>,
    /// True when the graph was dropped because identical jobs already wait
    /// in the store; `jobs` then holds those existing jobs for the root
    /// vertices with an identity key.
    pub deduplicated: bool,
}

pub struct JobQueue {
    store: Arc<dyn JobStore>,
    registry: Arc<FunctionRegistry>,
    no_delay: bool,
    conflict_retry: ConflictRetry,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("db", &self.store.db_name())
            .field("no_delay", &self.no_delay)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            store,
            registry,
            no_delay: false,
            conflict_retry: ConflictRetry::default(),
        }
    }

    /// Run delayed graphs right away, in dependency order, without storing
    /// anything.
    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    pub fn with_conflict_retry(mut self, conflict_retry: ConflictRetry) -> Self {
        self.conflict_retry = conflict_retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Commit the whole graph connected to `node`.
    pub async fn delay(&self, graph: &JobGraph, node: NodeId) -> Result<DelayOutcome> {
        let flat = graph.flatten(node)?;
        flat.check_acyclic()?;

        let now = Utc::now();
        let mut index = HashMap::new();
        let mut jobs = Vec::with_capacity(flat.len());
        for vertex in flat.vertices() {
            let (work, options) = graph
                .unit(vertex)
                .ok_or_else(|| QueueError::ConfigError(format!("{} is not a unit", graph.describe(vertex))))?;
            index.insert(vertex, jobs.len());
            jobs.push(Job::new(work.clone(), &self.resolve_options(&work.function, options), now));
        }

        ensure_same_graph_uuid(&mut jobs)?;
        link_jobs(&flat, &index, &mut jobs)?;

        if self.no_delay {
            let order: Vec<usize> = flat
                .topological_sort()
                .into_iter()
                .filter_map(|vertex| index.get(&vertex).copied())
                .collect();
            for i in order {
                self.execute_direct(&mut jobs[i], now)?;
            }
            return Ok(DelayOutcome {
                jobs,
                deduplicated: false,
            });
        }

        let roots: Vec<usize> = flat
            .root_vertices()
            .into_iter()
            .filter_map(|vertex| index.get(&vertex).copied())
            .collect();
        if let Some(existing) = self.find_duplicates(&jobs, &roots).await? {
            info!(jobs = jobs.len(), "identical jobs already queued, graph not delayed");
            let jobs = jobs
                .into_iter()
                .zip(existing)
                .map(|(new, found)| found.unwrap_or(new))
                .collect();
            return Ok(DelayOutcome {
                jobs,
                deduplicated: true,
            });
        }

        let mut stored = Vec::with_capacity(jobs.len());
        for job in jobs {
            debug!(job = %job.uuid, function = %job.work.function, state = %job.state, "storing job");
            stored.push(self.store.upsert(job).await?);
        }
        self.release_orphans(&mut stored).await?;
        info!(jobs = stored.len(), graph = ?stored.first().and_then(|j| j.graph_uuid), "graph delayed");
        Ok(DelayOutcome {
            jobs: stored,
            deduplicated: false,
        })
    }

    /// Put a job back to `Pending` with a fresh retry budget.
    ///
    /// Jobs waiting on their parents are left alone (returns `false`).
    pub async fn requeue(&self, uuid: Uuid) -> Result<bool> {
        let mut job = self.load(uuid).await?;
        if !job.requeue() {
            return Ok(false);
        }
        self.store.upsert(job).await?;
        Ok(true)
    }

    /// Mark a job done by hand and release its waiting children.
    pub async fn set_done(&self, uuid: Uuid, result: Option<String>) -> Result<()> {
        let mut job = self.load(uuid).await?;
        job.set_done(result, Utc::now());
        self.store.upsert(job).await?;
        enqueue_waiting(self.store.as_ref(), uuid, self.conflict_retry).await?;
        Ok(())
    }

    pub async fn cancel(&self, uuid: Uuid, result: Option<String>) -> Result<()> {
        let mut job = self.load(uuid).await?;
        job.set_cancelled(result, Utc::now());
        self.store.upsert(job).await?;
        Ok(())
    }

    /// Requeue jobs enqueued for longer than `enqueued_delta`: their dispatch
    /// was lost.
    pub async fn requeue_stuck(&self, enqueued_delta: TimeDelta, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let deadline = now - enqueued_delta;
        let mut requeued = Vec::new();
        for record in self.store.select_jobs(vec![JobState::Enqueued]).await? {
            let job = self.load(record.uuid).await?;
            if job.date_enqueued.is_some_and(|enqueued| enqueued < deadline)
                && self
                    .store
                    .transition(job.uuid, JobState::Enqueued, JobState::Pending)
                    .await?
            {
                info!(job = %job.uuid, "requeued stuck job");
                requeued.push(job.uuid);
            }
        }
        Ok(requeued)
    }

    async fn load(&self, uuid: Uuid) -> Result<Job> {
        match self.store.load(uuid).await {
            Ok(job) => Ok(job),
            Err(crate::store::StoreError::NotFound(uuid)) => Err(QueueError::JobNotFound(uuid)),
            Err(err) => Err(err.into()),
        }
    }

    /// Options with the function's default channel filled in.
    fn resolve_options(&self, function: &str, options: &JobOptions) -> JobOptions {
        let mut options = options.clone();
        if options.channel.is_none() {
            options.channel = self.registry.channel_of(function).map(str::to_string);
        }
        options
    }

    /// Existing live jobs for every root job (`roots` indexes `jobs`) with
    /// an identity key, or `None` as soon as one of them has no match (or no
    /// root has a key). Keys on dependent jobs are not looked up.
    async fn find_duplicates(&self, jobs: &[Job], roots: &[usize]) -> Result<Option<Vec<Option<Job>>>> {
        if roots.iter().all(|&i| jobs[i].identity_key.is_none()) {
            return Ok(None);
        }
        let mut found = vec![None; jobs.len()];
        for &i in roots {
            let Some(key) = &jobs[i].identity_key else {
                continue;
            };
            match self.store.find_by_identity_key(key.clone()).await? {
                Some(existing) => found[i] = Some(existing),
                None => return Ok(None),
            }
        }
        Ok(Some(found))
    }

    /// Release stored jobs still waiting on parents that are all done.
    ///
    /// Jobs are stored one by one, so a runner may finish a parent and
    /// propagate before its children exist; nothing else would wake them.
    async fn release_orphans(&self, stored: &mut [Job]) -> Result<()> {
        let parents: BTreeSet<Uuid> = stored
            .iter()
            .filter(|job| job.state == JobState::WaitDependencies)
            .flat_map(|job| job.depends_on.iter().copied())
            .collect();
        if parents.is_empty() {
            return Ok(());
        }

        let done: Vec<Uuid> = self
            .store
            .load_many(parents.into_iter().collect())
            .await?
            .into_iter()
            .filter(|parent| parent.state == JobState::Done)
            .map(|parent| parent.uuid)
            .collect();
        for parent in done {
            for child in enqueue_waiting(self.store.as_ref(), parent, self.conflict_retry).await? {
                debug!(job = %child, parent = %parent, "released job whose parents finished while storing");
                if let Some(slot) = stored.iter_mut().find(|job| job.uuid == child) {
                    *slot = self.load(child).await?;
                }
            }
        }
        Ok(())
    }

    fn execute_direct(&self, job: &mut Job, now: DateTime<Utc>) -> Result<()> {
        let function = self
            .registry
            .get(&job.work.function)
            .ok_or_else(|| QueueError::ConfigError(format!("unknown job function '{}'", job.work.function)))?;
        debug!(job = %job.uuid, function = %function.name, "executing job directly");
        let value = job.perform(&function.handler)?;
        let result = match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        };
        job.set_done(result, now);
        Ok(())
    }
}
