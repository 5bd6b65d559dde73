// src/exec/backend.rs

//! Hand-off of admitted jobs to the execution collaborator.
//!
//! The runner talks to an `ExecutionDispatcher` instead of running jobs
//! itself. Dispatching is fire-and-forget: implementations spawn whatever
//! they need and return immediately.
//!
//! - [`LocalDispatcher`] runs the job in-process, see [`run_job`].
//! - [`HttpDispatcher`] asks a remote worker over HTTP and puts the job back
//!   to `Pending` when the request cannot be confirmed.
//! - Tests provide their own dispatcher that records requests.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{QueueError, Result};
use crate::exec::dependencies::ConflictRetry;
use crate::exec::worker::run_job;
use crate::job::FunctionRegistry;
use crate::store::{BoxFuture, JobStore};
use crate::types::JobState;

/// A job the runner just moved to `Enqueued`.
#[derive(Clone)]
pub struct DispatchRequest {
    pub db_name: String,
    pub uuid: Uuid,
    pub store: Arc<dyn JobStore>,
}

impl std::fmt::Debug for DispatchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRequest")
            .field("db_name", &self.db_name)
            .field("uuid", &self.uuid)
            .finish_non_exhaustive()
    }
}

/// Trait abstracting how admitted jobs get executed.
pub trait ExecutionDispatcher: Send {
    /// Hand the job over. Must not wait for the job to finish.
    fn dispatch(&mut self, request: DispatchRequest) -> BoxFuture<'_, Result<()>>;
}

/// Runs jobs in-process on the tokio runtime.
#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    registry: Arc<FunctionRegistry>,
    conflict_retry: ConflictRetry,
}

impl LocalDispatcher {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            conflict_retry: ConflictRetry::default(),
        }
    }

    pub fn with_conflict_retry(mut self, conflict_retry: ConflictRetry) -> Self {
        self.conflict_retry = conflict_retry;
        self
    }
}

impl ExecutionDispatcher for LocalDispatcher {
    fn dispatch(&mut self, request: DispatchRequest) -> BoxFuture<'_, Result<()>> {
        let registry = Arc::clone(&self.registry);
        let conflict_retry = self.conflict_retry;

        Box::pin(async move {
            tokio::spawn(async move {
                let uuid = request.uuid;
                if let Err(err) =
                    run_job(request.store, registry, request.uuid, conflict_retry).await
                {
                    warn!(job = %uuid, db = %request.db_name, error = %err, "job execution error");
                }
            });
            Ok(())
        })
    }
}

/// Connection settings of the remote worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for HttpTarget {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: 8069,
            user: None,
            password: None,
        }
    }
}

/// Asks `{scheme}://{host}:{port}/queue_job/runjob` to run the job.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    target: HttpTarget,
    timeout: Duration,
}

impl HttpDispatcher {
    pub fn new(target: HttpTarget, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| QueueError::Dispatch(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            target,
            timeout,
        })
    }

    pub fn url(&self) -> String {
        format!(
            "{}://{}:{}/queue_job/runjob",
            self.target.scheme, self.target.host, self.target.port
        )
    }
}

impl ExecutionDispatcher for HttpDispatcher {
    fn dispatch(&mut self, request: DispatchRequest) -> BoxFuture<'_, Result<()>> {
        let url = self.url();
        let mut builder = self
            .client
            .get(&url)
            .query(&[
                ("db", request.db_name.clone()),
                ("job_uuid", request.uuid.to_string()),
            ])
            .timeout(self.timeout);
        if let Some(user) = &self.target.user {
            builder = builder.basic_auth(user, self.target.password.as_ref());
        }

        Box::pin(async move {
            tokio::spawn(async move {
                let uuid = request.uuid;
                let response = builder.send().await.and_then(|r| r.error_for_status());
                let err = match response {
                    Ok(_) => {
                        debug!(job = %uuid, "run request acknowledged");
                        return;
                    }
                    Err(err) => err,
                };

                if err.is_timeout() {
                    debug!(job = %uuid, url = %url, "run request timed out");
                } else {
                    warn!(job = %uuid, url = %url, error = %err, "run request failed");
                }
                // only a job nobody started goes back to pending
                match request
                    .store
                    .transition(uuid, JobState::Enqueued, JobState::Pending)
                    .await
                {
                    Ok(true) => debug!(job = %uuid, "job reset to pending"),
                    Ok(false) => {}
                    Err(err) => warn!(job = %uuid, error = %err, "could not reset job to pending"),
                }
            });
            Ok(())
        })
    }
}
