// src/store/memory.rs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::job::Job;
use crate::store::{
    BoxFuture, JobNotification, JobRecord, JobStore, StoreError, StoreResult,
};
use crate::types::JobState;

/// In-memory job table.
///
/// Every operation runs under one mutex, which makes state transitions and
/// dependency propagation atomic. Notifications are sent to every listener
/// after each mutation.
#[derive(Debug)]
pub struct MemoryJobStore {
    db_name: String,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    next_seq: u64,
    listeners: Vec<mpsc::UnboundedSender<JobNotification>>,
    pending_conflicts: u32,
    unavailable: bool,
}

impl MemoryJobStore {
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Make the next `count` calls to `enqueue_waiting` fail with a
    /// [`StoreError::Conflict`].
    pub fn inject_conflicts(&self, count: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.pending_conflicts = count;
        }
    }

    /// Simulate a lost connection: every operation but `close` fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }

    /// Current version of a job, if stored.
    pub fn get(&self, uuid: Uuid) -> Option<Job> {
        self.inner.lock().ok()?.jobs.get(&uuid).cloned()
    }

    /// All stored jobs ordered by insertion sequence.
    pub fn snapshot(&self) -> Vec<Job> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        let mut jobs: Vec<Job> = inner.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| job.seq);
        jobs
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        if inner.unavailable {
            return Err(StoreError::Unavailable(format!(
                "database '{}' is unavailable",
                self.db_name
            )));
        }
        Ok(inner)
    }

    fn notify(&self, inner: &mut Inner, uuid: Uuid) {
        let notification = JobNotification {
            db_name: self.db_name.clone(),
            uuid,
        };
        inner
            .listeners
            .retain(|tx| tx.send(notification.clone()).is_ok());
        trace!(db = %self.db_name, job = %uuid, "notification sent");
    }
}

impl JobStore for MemoryJobStore {
    fn db_name(&self) -> &str {
        &self.db_name
    }

    fn load(&self, uuid: Uuid) -> BoxFuture<'_, StoreResult<Job>> {
        Box::pin(async move {
            let inner = self.lock()?;
            inner.jobs.get(&uuid).cloned().ok_or(StoreError::NotFound(uuid))
        })
    }

    fn load_many(&self, uuids: Vec<Uuid>) -> BoxFuture<'_, StoreResult<Vec<Job>>> {
        Box::pin(async move {
            let inner = self.lock()?;
            Ok(uuids
                .iter()
                .filter_map(|uuid| inner.jobs.get(uuid).cloned())
                .collect())
        })
    }

    fn select_jobs(&self, states: Vec<JobState>) -> BoxFuture<'_, StoreResult<Vec<JobRecord>>> {
        Box::pin(async move {
            let inner = self.lock()?;
            let mut records: Vec<JobRecord> = inner
                .jobs
                .values()
                .filter(|job| states.contains(&job.state))
                .map(JobRecord::from)
                .collect();
            records.sort_by_key(|record| record.seq);
            Ok(records)
        })
    }

    fn select_job(&self, uuid: Uuid) -> BoxFuture<'_, StoreResult<Option<JobRecord>>> {
        Box::pin(async move {
            let inner = self.lock()?;
            Ok(inner.jobs.get(&uuid).map(JobRecord::from))
        })
    }

    fn upsert(&self, mut job: Job) -> BoxFuture<'_, StoreResult<Job>> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            match inner.jobs.get(&job.uuid) {
                // seq and date_created are owned by the store once assigned
                Some(existing) => {
                    job.seq = existing.seq;
                    job.date_created = existing.date_created;
                }
                None => {
                    inner.next_seq += 1;
                    job.seq = inner.next_seq;
                }
            }
            let uuid = job.uuid;
            inner.jobs.insert(uuid, job.clone());
            self.notify(&mut inner, uuid);
            Ok(job)
        })
    }

    fn transition(
        &self,
        uuid: Uuid,
        from: JobState,
        to: JobState,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            let job = inner.jobs.get_mut(&uuid).ok_or(StoreError::NotFound(uuid))?;
            if job.state != from {
                debug!(
                    db = %self.db_name,
                    job = %uuid,
                    expected = %from,
                    actual = %job.state,
                    "transition refused"
                );
                return Ok(false);
            }

            let now = Utc::now();
            match to {
                JobState::Pending => job.set_pending(None, false),
                JobState::WaitDependencies => job.set_wait_dependencies(),
                JobState::Enqueued => job.set_enqueued(now),
                JobState::Started => job.set_started(now),
                JobState::Done => job.set_done(None, now),
                JobState::Cancelled => job.set_cancelled(None, now),
                JobState::Failed => job.state = JobState::Failed,
            }
            self.notify(&mut inner, uuid);
            Ok(true)
        })
    }

    fn find_by_identity_key(&self, key: String) -> BoxFuture<'_, StoreResult<Option<Job>>> {
        Box::pin(async move {
            let inner = self.lock()?;
            Ok(inner
                .jobs
                .values()
                .filter(|job| {
                    job.identity_key.as_deref() == Some(key.as_str())
                        && JobState::IDENTITY_LIVE.contains(&job.state)
                })
                .min_by_key(|job| job.seq)
                .cloned())
        })
    }

    fn enqueue_waiting(&self, uuid: Uuid) -> BoxFuture<'_, StoreResult<Vec<Uuid>>> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            if inner.pending_conflicts > 0 {
                inner.pending_conflicts -= 1;
                return Err(StoreError::Conflict(format!(
                    "could not serialize access due to concurrent update of job {uuid}"
                )));
            }

            let parent = inner.jobs.get(&uuid).ok_or(StoreError::NotFound(uuid))?;
            let ready: Vec<Uuid> = parent
                .reverse_depends_on
                .iter()
                .filter(|child_uuid| {
                    inner.jobs.get(*child_uuid).is_some_and(|child| {
                        child.state == JobState::WaitDependencies
                            && child.depends_on.iter().all(|p| {
                                inner
                                    .jobs
                                    .get(p)
                                    .is_none_or(|parent| parent.state == JobState::Done)
                            })
                    })
                })
                .copied()
                .collect();

            for child_uuid in &ready {
                if let Some(child) = inner.jobs.get_mut(child_uuid) {
                    child.state = JobState::Pending;
                }
                self.notify(&mut inner, *child_uuid);
            }
            Ok(ready)
        })
    }

    fn keep_alive(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move { self.lock().map(|_| ()) })
    }

    fn listen(
        &self,
        sender: mpsc::UnboundedSender<JobNotification>,
    ) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            inner.listeners.push(sender);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
            inner.listeners.clear();
            Ok(())
        })
    }
}
