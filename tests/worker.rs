// tests/worker.rs

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use jobqueue::errors::QueueError;
use jobqueue::exec::{enqueue_waiting, run_job, ConflictRetry, JobOutcome, NOTHING_TO_DO};
use jobqueue::job::{FunctionRegistry, Job, JobError, JobFunction, JobOptions, WorkDescriptor};
use jobqueue::store::{JobStore, MemoryJobStore, StoreError};
use jobqueue::types::JobState;
use jobqueue_test_utils::builders::{
    failing_function, recording_function, retrying_function, ExecutionLog,
};
use jobqueue_test_utils::init_tracing;
use uuid::Uuid;

const FAST: ConflictRetry = ConflictRetry {
    max_tries: 5,
    base: Duration::from_millis(1),
};

fn registry(log: &ExecutionLog) -> Arc<FunctionRegistry> {
    let mut registry = FunctionRegistry::new();
    registry.register(recording_function("tests.record", Arc::clone(log)));
    registry.register(failing_function("tests.fail", "boom"));
    registry.register(retrying_function("tests.retry", 30));
    registry.register(JobFunction::new("tests.noop", |_| {
        Err(JobError::NothingToDo(String::new()))
    }));
    registry.register(JobFunction::new("tests.panic", |_| panic!("handler exploded")));
    Arc::new(registry)
}

/// Store an enqueued job calling `function`.
async fn enqueued(store: &MemoryJobStore, function: &str, options: JobOptions) -> Uuid {
    let mut job = Job::new(WorkDescriptor::new(function), &options, Utc::now());
    job.set_enqueued(Utc::now());
    store.upsert(job).await.unwrap().uuid
}

fn setup() -> (Arc<MemoryJobStore>, Arc<FunctionRegistry>, ExecutionLog) {
    init_tracing();
    let log: ExecutionLog = Arc::new(Mutex::new(Vec::new()));
    (Arc::new(MemoryJobStore::new("db")), registry(&log), log)
}

#[tokio::test]
async fn successful_job_is_done_and_releases_children() {
    let (store, registry, log) = setup();
    let uuid = enqueued(&store, "tests.record", JobOptions::new().description("parent")).await;
    let mut child = Job::new(WorkDescriptor::new("tests.record"), &JobOptions::new(), Utc::now());
    let mut parent = store.get(uuid).unwrap();
    child.add_depends([&mut parent]).unwrap();
    store.upsert(parent).await.unwrap();
    let child = store.upsert(child).await.unwrap().uuid;

    let outcome = run_job(store.clone(), registry, uuid, FAST).await.unwrap();

    assert_eq!(outcome, JobOutcome::Done);
    let job = store.get(uuid).unwrap();
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.result.as_deref(), Some("parent"));
    assert!(job.date_started.is_some() && job.date_done.is_some());
    assert_eq!(store.get(child).unwrap().state, JobState::Pending);
    assert_eq!(*log.lock().unwrap(), vec!["parent"]);
}

#[tokio::test]
async fn failing_job_keeps_failure_metadata() {
    let (store, registry, _) = setup();
    let uuid = enqueued(&store, "tests.fail", JobOptions::new()).await;

    let outcome = run_job(store.clone(), registry, uuid, FAST).await.unwrap();

    assert_eq!(outcome, JobOutcome::Failed);
    let job = store.get(uuid).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.exc_name.as_deref(), Some("FailedJobError"));
    assert_eq!(job.exc_message.as_deref(), Some("boom"));
}

#[tokio::test]
async fn retryable_job_is_postponed() {
    let (store, registry, _) = setup();
    let uuid = enqueued(&store, "tests.retry", JobOptions::new()).await;
    let before = Utc::now();

    let outcome = run_job(store.clone(), registry, uuid, FAST).await.unwrap();

    assert_eq!(outcome, JobOutcome::Postponed);
    let job = store.get(uuid).unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.retry, 1);
    assert_eq!(job.result.as_deref(), Some("not ready yet"));
    let eta = job.eta.expect("eta set");
    assert!(eta >= before + TimeDelta::seconds(30));
    assert!(eta <= Utc::now() + TimeDelta::seconds(30));
}

#[tokio::test]
async fn retryable_job_fails_once_retries_are_exhausted() {
    let (store, registry, _) = setup();
    let uuid = enqueued(&store, "tests.retry", JobOptions::new().max_retries(1)).await;

    let outcome = run_job(store.clone(), registry, uuid, FAST).await.unwrap();

    assert_eq!(outcome, JobOutcome::Failed);
    let job = store.get(uuid).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.exc_message.unwrap().starts_with("Max. retries (1) reached"));
}

#[tokio::test]
async fn nothing_to_do_counts_as_done() {
    let (store, registry, _) = setup();
    let uuid = enqueued(&store, "tests.noop", JobOptions::new()).await;

    let outcome = run_job(store.clone(), registry, uuid, FAST).await.unwrap();

    assert_eq!(outcome, JobOutcome::Done);
    let job = store.get(uuid).unwrap();
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.result.as_deref(), Some(NOTHING_TO_DO));
}

#[tokio::test]
async fn unknown_function_fails_the_job() {
    let (store, registry, _) = setup();
    let uuid = enqueued(&store, "tests.missing", JobOptions::new()).await;

    let outcome = run_job(store.clone(), registry, uuid, FAST).await.unwrap();

    assert_eq!(outcome, JobOutcome::Failed);
    assert_eq!(
        store.get(uuid).unwrap().exc_name.as_deref(),
        Some("UnknownFunction")
    );
}

#[tokio::test]
async fn panicking_handler_fails_the_job() {
    let (store, registry, _) = setup();
    let uuid = enqueued(&store, "tests.panic", JobOptions::new()).await;

    let outcome = run_job(store.clone(), registry, uuid, FAST).await.unwrap();

    assert_eq!(outcome, JobOutcome::Failed);
    let job = store.get(uuid).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.exc_name.as_deref(), Some("Panic"));
}

#[tokio::test]
async fn job_not_enqueued_is_skipped() {
    let (store, registry, log) = setup();
    let job = Job::new(WorkDescriptor::new("tests.record"), &JobOptions::new(), Utc::now());
    let uuid = store.upsert(job).await.unwrap().uuid;

    let outcome = run_job(store.clone(), registry, uuid, FAST).await.unwrap();

    assert_eq!(outcome, JobOutcome::Skipped);
    assert_eq!(store.get(uuid).unwrap().state, JobState::Pending);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn dependency_propagation_retries_conflicts() {
    let (store, _, _) = setup();
    let parent = enqueued(&store, "tests.record", JobOptions::new()).await;
    store.inject_conflicts(2);

    let released = enqueue_waiting(store.as_ref(), parent, FAST).await.unwrap();
    assert!(released.is_empty());
}

#[tokio::test]
async fn dependency_propagation_gives_up_after_max_tries() {
    let (store, _, _) = setup();
    let parent = enqueued(&store, "tests.record", JobOptions::new()).await;
    store.inject_conflicts(10);

    let retry = ConflictRetry {
        max_tries: 2,
        ..FAST
    };
    let err = enqueue_waiting(store.as_ref(), parent, retry).await.unwrap_err();

    assert!(matches!(err, QueueError::Store(StoreError::Conflict(_))));
}

#[tokio::test]
async fn child_waits_until_every_parent_is_done() {
    let (store, _, _) = setup();
    let mut first = Job::new(WorkDescriptor::new("a"), &JobOptions::new(), Utc::now());
    let mut second = Job::new(WorkDescriptor::new("b"), &JobOptions::new(), Utc::now());
    let mut child = Job::new(WorkDescriptor::new("c"), &JobOptions::new(), Utc::now());
    child.add_depends([&mut first, &mut second]).unwrap();
    first.set_done(None, Utc::now());
    let (first, second, child) = (
        store.upsert(first).await.unwrap(),
        store.upsert(second).await.unwrap(),
        store.upsert(child).await.unwrap(),
    );

    assert!(enqueue_waiting(store.as_ref(), first.uuid, FAST).await.unwrap().is_empty());
    assert_eq!(store.get(child.uuid).unwrap().state, JobState::WaitDependencies);

    let mut second = second;
    second.set_done(None, Utc::now());
    store.upsert(second.clone()).await.unwrap();
    assert_eq!(
        enqueue_waiting(store.as_ref(), second.uuid, FAST).await.unwrap(),
        vec![child.uuid]
    );
    assert_eq!(store.get(child.uuid).unwrap().state, JobState::Pending);
}

#[cfg(unix)]
mod shell {
    use super::*;
    use jobqueue::exec::{shell_function, SHELL_FUNCTION};

    async fn run_command(cmd: &str) -> (JobOutcome, Job) {
        init_tracing();
        let store = Arc::new(MemoryJobStore::new("db"));
        let mut registry = FunctionRegistry::new();
        registry.register(shell_function());
        let mut job = Job::new(
            WorkDescriptor::new(SHELL_FUNCTION).arg(cmd),
            &JobOptions::new(),
            Utc::now(),
        );
        job.set_enqueued(Utc::now());
        let uuid = store.upsert(job).await.unwrap().uuid;

        let outcome = run_job(store.clone(), Arc::new(registry), uuid, FAST)
            .await
            .unwrap();
        (outcome, store.get(uuid).unwrap())
    }

    #[tokio::test]
    async fn zero_exit_keeps_stdout_as_result() {
        let (outcome, job) = run_command("echo hello").await;
        assert_eq!(outcome, JobOutcome::Done);
        assert_eq!(job.result.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn tempfail_exit_is_retried() {
        let (outcome, job) = run_command("echo busy >&2; exit 75").await;
        assert_eq!(outcome, JobOutcome::Postponed);
        assert_eq!(job.state, JobState::Pending);
        assert!(job.result.unwrap().contains("busy"));
    }

    #[tokio::test]
    async fn other_exit_fails_the_job() {
        let (outcome, job) = run_command("exit 3").await;
        assert_eq!(outcome, JobOutcome::Failed);
        assert!(job.exc_message.unwrap().contains("status 3"));
    }
}
