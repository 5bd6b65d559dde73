// src/store/mod.rs

//! Persistent job table abstraction.
//!
//! The runner, the dispatchers and the [`JobQueue`](crate::queue::JobQueue)
//! only talk to a [`JobStore`]. One store instance serves one logical
//! database; the runner can drive several of them.

pub mod memory;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::job::Job;
use crate::types::JobState;

pub use memory::MemoryJobStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    /// Concurrent update detected; the operation may be retried.
    #[error("concurrent update: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Scheduling-relevant columns of a stored job, as consumed by the channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub uuid: Uuid,
    pub channel: String,
    pub seq: u64,
    pub date_created: DateTime<Utc>,
    pub priority: i32,
    pub eta: Option<DateTime<Utc>>,
    pub state: JobState,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            uuid: job.uuid,
            channel: job.channel.clone(),
            seq: job.seq,
            date_created: job.date_created,
            priority: job.priority,
            eta: job.eta,
            state: job.state,
        }
    }
}

/// Change notification emitted whenever a stored job is inserted or mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNotification {
    pub db_name: String,
    pub uuid: Uuid,
}

/// The job table of one logical database.
///
/// Every state change must be atomic per row: `transition` only succeeds
/// when the row is in the expected state, which is what keeps two runners
/// from dispatching the same job twice.
pub trait JobStore: Send + Sync {
    fn db_name(&self) -> &str;

    fn load(&self, uuid: Uuid) -> BoxFuture<'_, StoreResult<Job>>;

    /// Load the given jobs, silently skipping unknown uuids.
    fn load_many(&self, uuids: Vec<Uuid>) -> BoxFuture<'_, StoreResult<Vec<Job>>>;

    fn select_jobs(&self, states: Vec<JobState>) -> BoxFuture<'_, StoreResult<Vec<JobRecord>>>;

    fn select_job(&self, uuid: Uuid) -> BoxFuture<'_, StoreResult<Option<JobRecord>>>;

    /// Insert or update a job. New jobs get their `seq` assigned; the stored
    /// version is returned.
    fn upsert(&self, job: Job) -> BoxFuture<'_, StoreResult<Job>>;

    /// Move a job from `from` to `to`. Returns `false` when the job is not in
    /// state `from` (nothing is changed then).
    fn transition(
        &self,
        uuid: Uuid,
        from: JobState,
        to: JobState,
    ) -> BoxFuture<'_, StoreResult<bool>>;

    /// A job in `WaitDependencies`, `Pending` or `Enqueued` carrying `key`.
    fn find_by_identity_key(&self, key: String) -> BoxFuture<'_, StoreResult<Option<Job>>>;

    /// Move every `WaitDependencies` child of `uuid` whose parents are all
    /// `Done` to `Pending`. Returns the uuids of the children moved.
    fn enqueue_waiting(&self, uuid: Uuid) -> BoxFuture<'_, StoreResult<Vec<Uuid>>>;

    /// Keep an idle connection open.
    fn keep_alive(&self) -> BoxFuture<'_, StoreResult<()>>;

    /// Subscribe to change notifications.
    fn listen(
        &self,
        sender: mpsc::UnboundedSender<JobNotification>,
    ) -> BoxFuture<'_, StoreResult<()>>;

    /// Drop all subscriptions.
    fn close(&self) -> BoxFuture<'_, StoreResult<()>>;
}
