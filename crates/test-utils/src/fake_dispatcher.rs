use std::sync::{Arc, Mutex};

use chrono::Utc;
use jobqueue::errors::Result;
use jobqueue::exec::{DispatchRequest, ExecutionDispatcher};
use jobqueue::store::BoxFuture;
use jobqueue::types::JobState;
use uuid::Uuid;

/// A fake dispatcher that:
/// - records which jobs were dispatched (database, uuid)
/// - optionally completes each job right away (`Started` then `Done`,
///   releasing its waiting children), without running any function.
#[derive(Debug, Clone)]
pub struct FakeDispatcher {
    dispatched: Arc<Mutex<Vec<(String, Uuid)>>>,
    complete: bool,
}

impl FakeDispatcher {
    /// Record only: dispatched jobs stay `Enqueued`.
    pub fn recording(dispatched: Arc<Mutex<Vec<(String, Uuid)>>>) -> Self {
        Self {
            dispatched,
            complete: false,
        }
    }

    /// Record and mark every dispatched job `Done`.
    pub fn completing(dispatched: Arc<Mutex<Vec<(String, Uuid)>>>) -> Self {
        Self {
            dispatched,
            complete: true,
        }
    }
}

impl ExecutionDispatcher for FakeDispatcher {
    fn dispatch(&mut self, request: DispatchRequest) -> BoxFuture<'_, Result<()>> {
        let dispatched = Arc::clone(&self.dispatched);
        let complete = self.complete;

        Box::pin(async move {
            {
                let mut guard = dispatched.lock().unwrap();
                guard.push((request.db_name.clone(), request.uuid));
            }

            if complete {
                let store = request.store;
                if store
                    .transition(request.uuid, JobState::Enqueued, JobState::Started)
                    .await?
                {
                    let mut job = store.load(request.uuid).await?;
                    job.set_done(Some("done by fake dispatcher".to_string()), Utc::now());
                    store.upsert(job).await?;
                    store.enqueue_waiting(request.uuid).await?;
                }
            }
            Ok(())
        })
    }
}
