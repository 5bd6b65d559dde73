// src/job/function.rs

//! Job functions: the opaque work a job performs.
//!
//! A job only stores a [`WorkDescriptor`](super::WorkDescriptor) naming a
//! function and its arguments. The [`FunctionRegistry`] resolves that name to
//! a handler plus the per-function scheduling configuration (default channel,
//! retry pattern).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::job::model::Job;
use crate::job::retry::{RetryDelay, RetryPolicy};

/// Error reported by a job handler, or produced by [`Job::perform`] when the
/// retry budget is spent.
#[derive(Error, Debug)]
pub enum JobError {
    /// Try again later, optionally after `seconds`, optionally without
    /// counting the attempt against the retry budget.
    #[error("{message}")]
    Retryable {
        message: String,
        seconds: Option<RetryDelay>,
        ignore_retry: bool,
    },

    /// The job cannot succeed; do not retry.
    #[error("{0}")]
    Failed(String),

    /// A retryable error occurred but the retry budget is spent.
    #[error("Max. retries ({max_retries}) reached: {source}")]
    RetriesExhausted {
        max_retries: u32,
        #[source]
        source: Box<JobError>,
    },

    /// The work turned out to be unnecessary; the job is considered done.
    #[error("{0}")]
    NothingToDo(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    pub fn retry_later(message: impl Into<String>) -> Self {
        JobError::Retryable {
            message: message.into(),
            seconds: None,
            ignore_retry: false,
        }
    }

    /// Set the postpone delay of a retryable error. No-op for other kinds.
    pub fn after(self, delay: impl Into<RetryDelay>) -> Self {
        match self {
            JobError::Retryable {
                message,
                ignore_retry,
                ..
            } => JobError::Retryable {
                message,
                seconds: Some(delay.into()),
                ignore_retry,
            },
            other => other,
        }
    }

    /// Do not count this retry against `max_retries`. No-op for other kinds.
    pub fn ignoring_retry(self) -> Self {
        match self {
            JobError::Retryable {
                message, seconds, ..
            } => JobError::Retryable {
                message,
                seconds,
                ignore_retry: true,
            },
            other => other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Retryable { .. })
    }

    /// Short kind name stored as `exc_name` on failed jobs.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Retryable { .. } => "RetryableJobError",
            JobError::Failed(_) => "FailedJobError",
            JobError::RetriesExhausted { .. } => "FailedJobError",
            JobError::NothingToDo(_) => "NothingToDoJob",
            JobError::Other(_) => "Error",
        }
    }
}

/// Callable performing a job's work.
pub type JobHandler = Arc<dyn Fn(&Job) -> Result<Value, JobError> + Send + Sync>;

/// A registered job function.
#[derive(Clone)]
pub struct JobFunction {
    pub name: String,
    /// Channel used by jobs that do not set one explicitly.
    pub channel: Option<String>,
    pub retry_policy: RetryPolicy,
    pub handler: JobHandler,
}

impl JobFunction {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Job) -> Result<Value, JobError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            channel: None,
            retry_policy: RetryPolicy::default(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

impl fmt::Debug for JobFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFunction")
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

/// Name → function lookup.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, JobFunction>,
    default_policy: RetryPolicy,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry policy used for jobs whose function is unknown.
    pub fn with_default_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn register(&mut self, function: JobFunction) {
        self.functions.insert(function.name.clone(), function);
    }

    pub fn get(&self, name: &str) -> Option<&JobFunction> {
        self.functions.get(name)
    }

    pub fn retry_policy(&self, name: &str) -> &RetryPolicy {
        self.functions
            .get(name)
            .map(|f| &f.retry_policy)
            .unwrap_or(&self.default_policy)
    }

    /// Default channel of a function, if configured.
    pub fn channel_of(&self, name: &str) -> Option<&str> {
        self.functions.get(name).and_then(|f| f.channel.as_deref())
    }

    /// Override the channel / retry pattern of an already registered function.
    pub fn configure(&mut self, name: &str, channel: Option<String>, policy: Option<RetryPolicy>) {
        if let Some(function) = self.functions.get_mut(name) {
            if channel.is_some() {
                function.channel = channel;
            }
            if let Some(policy) = policy {
                function.retry_policy = policy;
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(|s| s.as_str())
    }
}
