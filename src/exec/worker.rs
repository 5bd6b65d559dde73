// src/exec/worker.rs

//! Execution of one enqueued job: start it, perform it, record the outcome.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::Result;
use crate::exec::dependencies::{enqueue_waiting, ConflictRetry};
use crate::job::{FailureInfo, FunctionRegistry, Job, JobError};
use crate::store::JobStore;
use crate::types::JobState;

/// Result message of a job that turned out to have nothing to do.
pub const NOTHING_TO_DO: &str = "Job interrupted and set to Done: nothing to do.";

/// What happened to a job handed to [`run_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    /// Retryable error: back to `Pending` (or `WaitDependencies`) with an eta.
    Postponed,
    Failed,
    /// The job was not `Enqueued` anymore; nothing was done.
    Skipped,
}

/// Run an `Enqueued` job to completion.
///
/// The job is atomically moved to `Started` first, so a job dispatched twice
/// only runs once. The work itself runs on a blocking thread.
pub async fn run_job(
    store: Arc<dyn JobStore>,
    registry: Arc<FunctionRegistry>,
    uuid: Uuid,
    conflict_retry: ConflictRetry,
) -> Result<JobOutcome> {
    if !store
        .transition(uuid, JobState::Enqueued, JobState::Started)
        .await?
    {
        warn!(job = %uuid, db = %store.db_name(), "job is not enqueued anymore, skipping");
        return Ok(JobOutcome::Skipped);
    }

    let job = store.load(uuid).await?;
    let function_name = job.work.function.clone();
    let Some(function) = registry.get(&function_name).cloned() else {
        let mut job = job;
        error!(job = %uuid, function = %function_name, "unknown job function");
        job.set_failed(FailureInfo {
            exc_name: "UnknownFunction".to_string(),
            exc_message: format!("no job function registered under '{function_name}'"),
            exc_info: format!("no job function registered under '{function_name}'"),
        });
        store.upsert(job).await?;
        return Ok(JobOutcome::Failed);
    };

    info!(job = %uuid, function = %function_name, retry = job.retry + 1, "starting job");
    let handler = Arc::clone(&function.handler);
    let joined = tokio::task::spawn_blocking(move || {
        let mut job = job;
        let result = job.perform(&handler);
        (job, result)
    })
    .await;
    let (mut job, result) = match joined {
        Ok(pair) => pair,
        Err(join_err) => {
            error!(job = %uuid, function = %function_name, error = %join_err, "job worker panicked");
            let mut job = store.load(uuid).await?;
            job.set_failed(FailureInfo {
                exc_name: "Panic".to_string(),
                exc_message: join_err.to_string(),
                exc_info: format!("{join_err:?}"),
            });
            store.upsert(job).await?;
            return Ok(JobOutcome::Failed);
        }
    };

    let now = Utc::now();
    match result {
        Ok(value) => {
            job.set_done(result_message(value), now);
            store.upsert(job).await?;
            info!(job = %uuid, "job done");
            enqueue_waiting(store.as_ref(), uuid, conflict_retry).await?;
            Ok(JobOutcome::Done)
        }
        Err(JobError::NothingToDo(message)) => {
            let message = if message.is_empty() {
                NOTHING_TO_DO.to_string()
            } else {
                message
            };
            job.set_done(Some(message), now);
            store.upsert(job).await?;
            info!(job = %uuid, "job had nothing to do");
            enqueue_waiting(store.as_ref(), uuid, conflict_retry).await?;
            Ok(JobOutcome::Done)
        }
        Err(JobError::Retryable {
            message, seconds, ..
        }) => {
            job.postpone(Some(message), seconds, &function.retry_policy, now);
            job.set_pending(None, false);
            if !parents_done(store.as_ref(), &job).await? {
                job.set_wait_dependencies();
            }
            debug!(job = %uuid, eta = ?job.eta, retry = job.retry, "job postponed");
            store.upsert(job).await?;
            Ok(JobOutcome::Postponed)
        }
        Err(err) => {
            let failure = FailureInfo::from_error(&err);
            error!(job = %uuid, function = %function_name, error = %failure.exc_info, "job failed");
            job.set_failed(failure);
            store.upsert(job).await?;
            Ok(JobOutcome::Failed)
        }
    }
}

async fn parents_done(store: &dyn JobStore, job: &Job) -> Result<bool> {
    if job.depends_on.is_empty() {
        return Ok(true);
    }
    let parents = store
        .load_many(job.depends_on.iter().copied().collect())
        .await?;
    Ok(parents.iter().all(Job::is_done))
}

fn result_message(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
