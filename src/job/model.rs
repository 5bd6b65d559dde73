// src/job/model.rs

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::error::Error as StdError;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::{QueueError, Result};
use crate::job::function::{JobError, JobHandler};
use crate::job::identity::identity_exact;
use crate::job::retry::{RetryDelay, RetryPolicy};
use crate::types::{JobState, DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY};

/// The work a job performs: a registered function name plus its arguments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkDescriptor {
    /// Registry name, e.g. `"res.partner.export"` or `"shell.run"`.
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl WorkDescriptor {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }
}

/// How the identity key of a new job is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKey {
    /// Derived from the work descriptor, see [`identity_exact`].
    Exact,
    Key(String),
}

/// Optional scheduling attributes given when a job is created.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub priority: Option<i32>,
    pub eta: Option<DateTime<Utc>>,
    pub max_retries: Option<u32>,
    pub description: Option<String>,
    pub channel: Option<String>,
    pub identity_key: Option<IdentityKey>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn identity_key(mut self, key: IdentityKey) -> Self {
        self.identity_key = Some(key);
        self
    }
}

/// Failure metadata persisted on a `Failed` job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FailureInfo {
    pub exc_name: String,
    pub exc_message: String,
    pub exc_info: String,
}

impl FailureInfo {
    /// Build failure metadata from a job error, walking its source chain
    /// for the detailed info.
    pub fn from_error(err: &JobError) -> Self {
        let mut exc_info = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            exc_info.push_str("\ncaused by: ");
            exc_info.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            exc_name: err.kind().to_string(),
            exc_message: err.to_string(),
            exc_info,
        }
    }
}

/// One unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub uuid: Uuid,
    pub graph_uuid: Option<Uuid>,
    pub state: JobState,
    pub priority: i32,
    pub eta: Option<DateTime<Utc>>,
    pub date_created: DateTime<Utc>,
    pub date_enqueued: Option<DateTime<Utc>>,
    pub date_started: Option<DateTime<Utc>>,
    pub date_done: Option<DateTime<Utc>>,
    pub date_cancelled: Option<DateTime<Utc>>,
    /// `0` means retry forever.
    pub max_retries: u32,
    pub retry: u32,
    pub channel: String,
    /// Store insertion sequence, `0` until the job is stored.
    pub seq: u64,
    pub work: WorkDescriptor,
    pub description: Option<String>,
    pub identity_key: Option<String>,
    pub result: Option<String>,
    pub exc_name: Option<String>,
    pub exc_message: Option<String>,
    pub exc_info: Option<String>,
    pub depends_on: BTreeSet<Uuid>,
    pub reverse_depends_on: BTreeSet<Uuid>,
}

impl Job {
    /// Create a new `Pending` job. A missing channel lands in `root`.
    pub fn new(work: WorkDescriptor, options: &JobOptions, now: DateTime<Utc>) -> Self {
        let identity_key = match &options.identity_key {
            Some(IdentityKey::Exact) => Some(identity_exact(&work)),
            Some(IdentityKey::Key(key)) => Some(key.clone()),
            None => None,
        };
        let description = options
            .description
            .clone()
            .unwrap_or_else(|| work.function.clone());

        Self {
            uuid: Uuid::new_v4(),
            graph_uuid: None,
            state: JobState::Pending,
            priority: options.priority.unwrap_or(DEFAULT_PRIORITY),
            eta: options.eta,
            date_created: now,
            date_enqueued: None,
            date_started: None,
            date_done: None,
            date_cancelled: None,
            max_retries: options.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry: 0,
            channel: options.channel.clone().unwrap_or_else(|| "root".to_string()),
            seq: 0,
            work,
            description: Some(description),
            identity_key,
            result: None,
            exc_name: None,
            exc_message: None,
            exc_info: None,
            depends_on: BTreeSet::new(),
            reverse_depends_on: BTreeSet::new(),
        }
    }

    /// Make `self` depend on every job in `parents`.
    ///
    /// Links are recorded in both directions. If any parent is not `Done`,
    /// `self` moves to `WaitDependencies`.
    pub fn add_depends<'a, I>(&mut self, parents: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a mut Job>,
    {
        let parents: Vec<&'a mut Job> = parents.into_iter().collect();
        if parents.iter().any(|parent| parent.uuid == self.uuid) {
            return Err(QueueError::SelfDependency(self.uuid.to_string()));
        }

        let mut unmet = false;
        for parent in parents {
            self.depends_on.insert(parent.uuid);
            parent.reverse_depends_on.insert(self.uuid);
            unmet |= parent.state != JobState::Done;
        }
        if unmet {
            self.state = JobState::WaitDependencies;
        }
        Ok(())
    }

    /// Run the work once through `handler`.
    ///
    /// `retry` is incremented before the call. A retryable error is turned
    /// into [`JobError::RetriesExhausted`] once the retry budget is spent.
    pub fn perform(&mut self, handler: &JobHandler) -> std::result::Result<Value, JobError> {
        self.retry += 1;
        match handler(&*self) {
            Ok(value) => Ok(value),
            Err(err @ JobError::Retryable { ignore_retry: true, .. }) => {
                self.retry -= 1;
                Err(err)
            }
            Err(err @ JobError::Retryable { .. }) => {
                if self.max_retries == 0 || self.retry < self.max_retries {
                    Err(err)
                } else {
                    Err(JobError::RetriesExhausted {
                        max_retries: self.max_retries,
                        source: Box::new(err),
                    })
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Push the eta of the job into the future.
    ///
    /// `seconds` wins when given, otherwise the retry policy decides based on
    /// the current retry count.
    pub fn postpone(
        &mut self,
        result: Option<String>,
        seconds: Option<RetryDelay>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) {
        let delay = seconds.unwrap_or_else(|| policy.delay_for(self.retry));
        let secs = i64::try_from(delay.seconds()).unwrap_or(i64::MAX);
        let delta = TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX);
        self.eta = Some(now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC));
        self.exc_name = None;
        self.exc_info = None;
        if result.is_some() {
            self.result = result;
        }
    }

    pub fn set_pending(&mut self, result: Option<String>, reset_retry: bool) {
        self.state = JobState::Pending;
        self.date_enqueued = None;
        self.date_started = None;
        self.date_done = None;
        self.date_cancelled = None;
        if reset_retry {
            self.retry = 0;
        }
        if result.is_some() {
            self.result = result;
        }
    }

    /// Park the job until its parents are done.
    pub fn set_wait_dependencies(&mut self) {
        self.state = JobState::WaitDependencies;
    }

    pub fn set_enqueued(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Enqueued;
        self.date_enqueued = Some(now);
        self.date_started = None;
    }

    pub fn set_started(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Started;
        self.date_started = Some(now);
    }

    pub fn set_done(&mut self, result: Option<String>, now: DateTime<Utc>) {
        self.state = JobState::Done;
        self.exc_name = None;
        self.exc_message = None;
        self.exc_info = None;
        self.date_done = Some(now);
        if result.is_some() {
            self.result = result;
        }
    }

    pub fn set_cancelled(&mut self, result: Option<String>, now: DateTime<Utc>) {
        self.state = JobState::Cancelled;
        self.date_cancelled = Some(now);
        if result.is_some() {
            self.result = result;
        }
    }

    pub fn set_failed(&mut self, failure: FailureInfo) {
        self.state = JobState::Failed;
        self.exc_name = Some(failure.exc_name);
        self.exc_message = Some(failure.exc_message);
        self.exc_info = Some(failure.exc_info);
    }

    /// Put a job back to `Pending` with a fresh retry budget.
    ///
    /// Returns `false` (and does nothing) for jobs still waiting on parents.
    pub fn requeue(&mut self) -> bool {
        if self.state == JobState::WaitDependencies {
            return false;
        }
        self.set_pending(None, true);
        true
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }
}

/// Generic total order over jobs: `(eta, priority, date_created, seq)`,
/// where any job with an eta sorts before every job without one.
///
/// This is not the order channels admit jobs in.
pub fn cmp_eta_first(a: &Job, b: &Job) -> Ordering {
    match (a.eta, b.eta) {
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => (a.eta, a.priority, a.date_created, a.seq).cmp(&(
            b.eta,
            b.priority,
            b.date_created,
            b.seq,
        )),
    }
}
