// tests/job_queue.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeDelta, Utc};
use jobqueue::dag::JobGraph;
use jobqueue::errors::QueueError;
use jobqueue::job::{FunctionRegistry, IdentityKey, Job, JobOptions, WorkDescriptor};
use jobqueue::queue::JobQueue;
use jobqueue::store::{
    BoxFuture, JobNotification, JobRecord, JobStore, MemoryJobStore, StoreResult,
};
use jobqueue::types::JobState;
use jobqueue_test_utils::builders::{failing_function, recording_function, ExecutionLog};
use tokio::sync::mpsc;
use uuid::Uuid;

fn setup() -> (Arc<MemoryJobStore>, JobQueue, ExecutionLog) {
    let log: ExecutionLog = Arc::new(Mutex::new(Vec::new()));
    let mut registry = FunctionRegistry::new();
    registry.register(recording_function("tests.record", Arc::clone(&log)).with_channel("root.records"));
    registry.register(failing_function("tests.fail", "boom"));

    let store = Arc::new(MemoryJobStore::new("db"));
    let queue = JobQueue::new(store.clone(), Arc::new(registry));
    (store, queue, log)
}

fn record(description: &str) -> (WorkDescriptor, JobOptions) {
    (
        WorkDescriptor::new("tests.record").arg(description),
        JobOptions::new().description(description),
    )
}

fn chain_of(graph: &mut JobGraph, names: &[&str]) -> jobqueue::dag::NodeId {
    let nodes: Vec<_> = names
        .iter()
        .map(|name| {
            let (work, options) = record(name);
            graph.delayable(work, options)
        })
        .collect();
    graph.chain(&nodes).unwrap()
}

#[tokio::test]
async fn delay_stores_a_linked_graph() {
    let (store, queue, _) = setup();
    let mut graph = JobGraph::new();
    let chain = chain_of(&mut graph, &["a", "b", "c"]);

    let outcome = queue.delay(&graph, chain).await.unwrap();

    assert!(!outcome.deduplicated);
    assert_eq!(outcome.jobs.len(), 3);
    let stored = store.snapshot();
    assert_eq!(stored.len(), 3);

    let graph_uuid = stored[0].graph_uuid.expect("graph uuid");
    assert!(stored.iter().all(|job| job.graph_uuid == Some(graph_uuid)));
    let states: Vec<JobState> = stored.iter().map(|job| job.state).collect();
    assert_eq!(
        states,
        vec![JobState::Pending, JobState::WaitDependencies, JobState::WaitDependencies]
    );
    // function default channel applies
    assert!(stored.iter().all(|job| job.channel == "root.records"));
    assert_eq!(stored.iter().map(|job| job.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[tokio::test]
async fn single_job_has_no_graph_uuid() {
    let (store, queue, _) = setup();
    let mut graph = JobGraph::new();
    let (work, options) = record("alone");
    let node = graph.delayable(work, options.channel("root.elsewhere"));

    queue.delay(&graph, node).await.unwrap();

    let stored = store.snapshot();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].graph_uuid, None);
    assert_eq!(stored[0].channel, "root.elsewhere");
}

#[tokio::test]
async fn cyclic_graph_is_not_stored() {
    let (store, queue, _) = setup();
    let mut graph = JobGraph::new();
    let (work, options) = record("a");
    let a = graph.delayable(work, options);
    let (work, options) = record("b");
    let b = graph.delayable(work, options);
    graph.on_done(a, &[b]).unwrap();
    graph.on_done(b, &[a]).unwrap();

    let err = queue.delay(&graph, a).await.unwrap_err();

    assert!(matches!(err, QueueError::DagCycle(_)));
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn identical_identity_key_is_delayed_once() {
    let (store, queue, _) = setup();
    let options = JobOptions::new().identity_key(IdentityKey::Exact);
    let work = WorkDescriptor::new("tests.record").arg("same");

    let mut graph = JobGraph::new();
    let first = graph.delayable(work.clone(), options.clone());
    let second = graph.delayable(work, options);

    let one = queue.delay(&graph, first).await.unwrap();
    let two = queue.delay(&graph, second).await.unwrap();

    assert!(!one.deduplicated);
    assert!(two.deduplicated);
    assert_eq!(store.snapshot().len(), 1);
    assert_eq!(two.jobs[0].uuid, one.jobs[0].uuid);
}

#[tokio::test]
async fn finished_job_does_not_deduplicate() {
    let (store, queue, _) = setup();
    let options = JobOptions::new().identity_key(IdentityKey::Key("nightly".to_string()));
    let mut graph = JobGraph::new();
    let node = graph.delayable(WorkDescriptor::new("tests.record"), options);

    let first = queue.delay(&graph, node).await.unwrap();
    queue.set_done(first.jobs[0].uuid, None).await.unwrap();
    let second = queue.delay(&graph, node).await.unwrap();

    assert!(!second.deduplicated);
    assert_eq!(store.snapshot().len(), 2);
}

#[tokio::test]
async fn identity_key_on_a_dependent_job_does_not_deduplicate() {
    let (store, queue, _) = setup();
    let delay_chain = || {
        let mut graph = JobGraph::new();
        let (work, options) = record("root");
        let root = graph.delayable(work, options);
        let child = graph.delayable(
            WorkDescriptor::new("tests.record").arg("child"),
            JobOptions::new().identity_key(IdentityKey::Key("child".to_string())),
        );
        let chain = graph.chain(&[root, child]).unwrap();
        (graph, chain)
    };

    let (graph, chain) = delay_chain();
    let first = queue.delay(&graph, chain).await.unwrap();
    let (graph, chain) = delay_chain();
    let second = queue.delay(&graph, chain).await.unwrap();

    assert!(!first.deduplicated);
    assert!(!second.deduplicated);
    assert_eq!(store.snapshot().len(), 4);
}

/// Store whose first root job is finished (and its children propagated) by
/// a concurrent runner right after it is inserted, before the rest of the
/// graph is stored.
struct RunnerFinishesFirstParent {
    inner: Arc<MemoryJobStore>,
    finished: AtomicBool,
}

impl JobStore for RunnerFinishesFirstParent {
    fn db_name(&self) -> &str {
        self.inner.db_name()
    }

    fn load(&self, uuid: Uuid) -> BoxFuture<'_, StoreResult<Job>> {
        self.inner.load(uuid)
    }

    fn load_many(&self, uuids: Vec<Uuid>) -> BoxFuture<'_, StoreResult<Vec<Job>>> {
        self.inner.load_many(uuids)
    }

    fn select_jobs(&self, states: Vec<JobState>) -> BoxFuture<'_, StoreResult<Vec<JobRecord>>> {
        self.inner.select_jobs(states)
    }

    fn select_job(&self, uuid: Uuid) -> BoxFuture<'_, StoreResult<Option<JobRecord>>> {
        self.inner.select_job(uuid)
    }

    fn upsert(&self, job: Job) -> BoxFuture<'_, StoreResult<Job>> {
        Box::pin(async move {
            let stored = self.inner.upsert(job).await?;
            if stored.depends_on.is_empty() && !self.finished.swap(true, Ordering::SeqCst) {
                let mut done = stored.clone();
                done.set_done(None, Utc::now());
                self.inner.upsert(done).await?;
                self.inner.enqueue_waiting(stored.uuid).await?;
            }
            Ok(stored)
        })
    }

    fn transition(&self, uuid: Uuid, from: JobState, to: JobState) -> BoxFuture<'_, StoreResult<bool>> {
        self.inner.transition(uuid, from, to)
    }

    fn find_by_identity_key(&self, key: String) -> BoxFuture<'_, StoreResult<Option<Job>>> {
        self.inner.find_by_identity_key(key)
    }

    fn enqueue_waiting(&self, uuid: Uuid) -> BoxFuture<'_, StoreResult<Vec<Uuid>>> {
        self.inner.enqueue_waiting(uuid)
    }

    fn keep_alive(&self) -> BoxFuture<'_, StoreResult<()>> {
        self.inner.keep_alive()
    }

    fn listen(&self, sender: mpsc::UnboundedSender<JobNotification>) -> BoxFuture<'_, StoreResult<()>> {
        self.inner.listen(sender)
    }

    fn close(&self) -> BoxFuture<'_, StoreResult<()>> {
        self.inner.close()
    }
}

#[tokio::test]
async fn child_stored_after_its_parent_finished_is_released() {
    let memory = Arc::new(MemoryJobStore::new("db"));
    let store = Arc::new(RunnerFinishesFirstParent {
        inner: memory.clone(),
        finished: AtomicBool::new(false),
    });
    let queue = JobQueue::new(store, Arc::new(FunctionRegistry::new()));
    let mut graph = JobGraph::new();
    let chain = chain_of(&mut graph, &["parent", "child"]);

    let outcome = queue.delay(&graph, chain).await.unwrap();

    let (parent, child) = (&outcome.jobs[0], &outcome.jobs[1]);
    assert_eq!(memory.get(parent.uuid).unwrap().state, JobState::Done);
    assert_eq!(memory.get(child.uuid).unwrap().state, JobState::Pending);
    assert_eq!(child.state, JobState::Pending);
}

#[tokio::test]
async fn no_delay_runs_the_graph_in_order_without_storing() {
    let (store, queue, log) = setup();
    let queue = queue.with_no_delay(true);
    let mut graph = JobGraph::new();
    let chain = chain_of(&mut graph, &["first", "second", "third"]);

    let outcome = queue.delay(&graph, chain).await.unwrap();

    assert!(store.snapshot().is_empty());
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    assert!(outcome.jobs.iter().all(|job| job.state == JobState::Done));
}

#[tokio::test]
async fn no_delay_surfaces_job_errors() {
    let (_, queue, _) = setup();
    let queue = queue.with_no_delay(true);
    let mut graph = JobGraph::new();
    let node = graph.delayable(WorkDescriptor::new("tests.fail"), JobOptions::new());

    let err = queue.delay(&graph, node).await.unwrap_err();
    assert!(matches!(err, QueueError::Job(_)));
}

#[tokio::test]
async fn set_done_releases_waiting_children() {
    let (store, queue, _) = setup();
    let mut graph = JobGraph::new();
    let chain = chain_of(&mut graph, &["parent", "child"]);
    let outcome = queue.delay(&graph, chain).await.unwrap();
    let (parent, child) = (outcome.jobs[0].uuid, outcome.jobs[1].uuid);

    queue.set_done(parent, Some("manual".to_string())).await.unwrap();

    assert_eq!(store.get(parent).unwrap().state, JobState::Done);
    assert_eq!(store.get(parent).unwrap().result.as_deref(), Some("manual"));
    assert_eq!(store.get(child).unwrap().state, JobState::Pending);
}

#[tokio::test]
async fn requeue_and_cancel() {
    let (store, queue, _) = setup();
    let mut graph = JobGraph::new();
    let chain = chain_of(&mut graph, &["parent", "child"]);
    let outcome = queue.delay(&graph, chain).await.unwrap();
    let (parent, child) = (outcome.jobs[0].uuid, outcome.jobs[1].uuid);

    let mut failed = store.get(parent).unwrap();
    failed.retry = 3;
    failed.state = JobState::Failed;
    store.upsert(failed).await.unwrap();

    assert!(queue.requeue(parent).await.unwrap());
    assert_eq!(store.get(parent).unwrap().state, JobState::Pending);
    assert_eq!(store.get(parent).unwrap().retry, 0);
    assert!(!queue.requeue(child).await.unwrap());

    queue.cancel(child, Some("not needed".to_string())).await.unwrap();
    assert_eq!(store.get(child).unwrap().state, JobState::Cancelled);

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        queue.requeue(missing).await,
        Err(QueueError::JobNotFound(uuid)) if uuid == missing
    ));
}

#[tokio::test]
async fn requeue_stuck_only_touches_old_enqueued_jobs() {
    let (store, queue, _) = setup();
    let mut graph = JobGraph::new();
    let (work, options) = record("old");
    let old = graph.delayable(work, options);
    let (work, options) = record("fresh");
    let fresh = graph.delayable(work, options);
    let old = queue.delay(&graph, old).await.unwrap().jobs[0].uuid;
    let fresh = queue.delay(&graph, fresh).await.unwrap().jobs[0].uuid;

    let now = Utc::now();
    for (uuid, age) in [(old, 3_600), (fresh, 10)] {
        let mut job = store.get(uuid).unwrap();
        job.set_enqueued(now - TimeDelta::seconds(age));
        store.upsert(job).await.unwrap();
    }

    let requeued = queue
        .requeue_stuck(TimeDelta::minutes(5), now)
        .await
        .unwrap();

    assert_eq!(requeued, vec![old]);
    assert_eq!(store.get(old).unwrap().state, JobState::Pending);
    assert_eq!(store.get(fresh).unwrap().state, JobState::Enqueued);
}
