use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default priority of a job; lower values run first.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Default retry budget of a job (`0` means infinite retries).
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default postpone delay (seconds) when no retry pattern matches.
pub const RETRY_INTERVAL: u64 = 10 * 60;

/// Lifecycle state of a job.
///
/// - `WaitDependencies`: at least one parent job is not `Done` yet.
/// - `Pending`: ready to be admitted by a channel.
/// - `Enqueued`: handed to the execution collaborator, not started yet.
/// - `Started`: executing.
/// - `Done` / `Cancelled`: terminal.
/// - `Failed`: stays visible until an operator requeues it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    WaitDependencies,
    Pending,
    Enqueued,
    Started,
    Done,
    Cancelled,
    Failed,
}

impl JobState {
    /// States the runner loads at startup.
    pub const NOT_DONE: [JobState; 5] = [
        JobState::WaitDependencies,
        JobState::Pending,
        JobState::Enqueued,
        JobState::Started,
        JobState::Failed,
    ];

    /// States of a job that is runnable or already running.
    pub const RUNNABLE: [JobState; 3] = [
        JobState::Pending,
        JobState::Enqueued,
        JobState::Started,
    ];

    /// States that make a job count as an existing job for identity-key dedup.
    pub const IDENTITY_LIVE: [JobState; 3] = [
        JobState::WaitDependencies,
        JobState::Pending,
        JobState::Enqueued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::WaitDependencies => "wait_dependencies",
            JobState::Pending => "pending",
            JobState::Enqueued => "enqueued",
            JobState::Started => "started",
            JobState::Done => "done",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Pending
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wait_dependencies" => Ok(JobState::WaitDependencies),
            "pending" => Ok(JobState::Pending),
            "enqueued" => Ok(JobState::Enqueued),
            "started" => Ok(JobState::Started),
            "done" => Ok(JobState::Done),
            "cancelled" => Ok(JobState::Cancelled),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("invalid job state: {other}")),
        }
    }
}

/// How the runner hands admitted jobs over for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Run the job function in-process on a blocking worker.
    Local,
    /// Ask a remote worker over HTTP (`/queue_job/runjob`).
    Http,
}

impl Default for DispatchMode {
    fn default() -> Self {
        DispatchMode::Local
    }
}
