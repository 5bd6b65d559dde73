// src/engine/runner.rs

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

use crate::channels::ChannelManager;
use crate::errors::{QueueError, Result};
use crate::exec::{DispatchRequest, ExecutionDispatcher};
use crate::job::Job;
use crate::store::{JobNotification, JobStore, StoreError};
use crate::types::JobState;

use super::{RunnerHandle, RunnerOptions};

/// Event loop admitting jobs from one or more stores.
///
/// The runner exclusively owns the channel tree. Dispatched jobs only ever
/// report back through the store, whose notifications bring their new state
/// into the tree on a later iteration.
pub struct Runner<D: ExecutionDispatcher> {
    stores: Vec<Arc<dyn JobStore>>,
    dispatcher: D,
    manager: ChannelManager,
    options: RunnerOptions,
    handle: RunnerHandle,
    notifications: Option<mpsc::UnboundedReceiver<JobNotification>>,
    pending: VecDeque<JobNotification>,
}

impl<D: ExecutionDispatcher> fmt::Debug for Runner<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dbs: Vec<&str> = self.stores.iter().map(|s| s.db_name()).collect();
        f.debug_struct("Runner")
            .field("databases", &dbs)
            .field("manager", &self.manager)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<D: ExecutionDispatcher> Runner<D> {
    pub fn new(
        manager: ChannelManager,
        stores: Vec<Arc<dyn JobStore>>,
        dispatcher: D,
        options: RunnerOptions,
    ) -> Self {
        Self {
            stores,
            dispatcher,
            manager,
            options,
            handle: RunnerHandle::default(),
            notifications: None,
            pending: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> RunnerHandle {
        self.handle.clone()
    }

    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Run until stopped.
    ///
    /// Errors are not returned: the runner closes its stores, waits
    /// `error_recovery_delay` and starts over from the store state.
    pub async fn run(&mut self) -> Result<()> {
        while !self.handle.is_stopped() {
            if let Err(err) = self.serve().await {
                error!(
                    error = %err,
                    delay_secs = self.options.error_recovery_delay.as_secs_f64(),
                    "runner error, sleeping and retrying"
                );
                self.close_databases(true).await;
                self.pause(self.options.error_recovery_delay).await;
            }
        }
        self.close_databases(false).await;
        info!("runner stopped");
        Ok(())
    }

    async fn serve(&mut self) -> Result<()> {
        info!("initializing database connections");
        self.initialize_databases().await?;
        info!("database connections ready");

        while !self.handle.is_stopped() {
            self.process_notifications().await?;
            self.run_jobs().await?;
            if self.options.exit_when_idle && self.is_idle().await? {
                info!("no job left to run, stopping");
                self.handle.stop();
                break;
            }
            self.wait_notification().await?;
        }
        Ok(())
    }

    /// Subscribe to every store and feed all unfinished jobs to the channels.
    pub async fn initialize_databases(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.clear();

        for store in &self.stores {
            store.listen(tx.clone()).await?;
            let records = store.select_jobs(JobState::NOT_DONE.to_vec()).await?;
            debug!(db = %store.db_name(), jobs = records.len(), "loaded jobs");
            for record in &records {
                self.manager.notify(store.db_name(), record);
            }
        }

        self.notifications = Some(rx);
        Ok(())
    }

    /// Close every store. With `remove_jobs`, their jobs stop being tracked.
    pub async fn close_databases(&mut self, remove_jobs: bool) {
        for store in &self.stores {
            if remove_jobs {
                self.manager.remove_db(store.db_name());
            }
            if let Err(err) = store.close().await {
                warn!(db = %store.db_name(), error = %err, "error closing database");
            }
        }
        self.notifications = None;
        self.pending.clear();
    }

    /// Apply every buffered notification to the channels.
    ///
    /// Stores without any notification get a keep-alive.
    pub async fn process_notifications(&mut self) -> Result<()> {
        let rx = self.notifications.as_mut().ok_or_else(not_listening)?;
        loop {
            match rx.try_recv() {
                Ok(notification) => self.pending.push_back(notification),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(stream_closed()),
            }
        }

        let idle: Vec<Arc<dyn JobStore>> = {
            let notified: HashSet<&str> =
                self.pending.iter().map(|n| n.db_name.as_str()).collect();
            self.stores
                .iter()
                .filter(|store| !notified.contains(store.db_name()))
                .cloned()
                .collect()
        };
        for store in idle {
            store.keep_alive().await?;
        }

        while let Some(notification) = self.pending.pop_front() {
            if self.handle.is_stopped() {
                self.pending.push_front(notification);
                break;
            }
            let Some(store) = self.store(&notification.db_name) else {
                warn!(db = %notification.db_name, job = %notification.uuid, "notification from unknown database");
                continue;
            };
            match store.select_job(notification.uuid).await? {
                Some(record) => self.manager.notify(&notification.db_name, &record),
                None => self.manager.remove_job(notification.uuid),
            }
        }
        Ok(())
    }

    /// Admit jobs, move them to `Enqueued` and dispatch them.
    ///
    /// Returns the number of jobs dispatched.
    pub async fn run_jobs(&mut self) -> Result<usize> {
        let now = Utc::now();
        let mut dispatched = 0;

        for job in self.manager.get_jobs_to_run(now) {
            if self.handle.is_stopped() {
                break;
            }
            let Some(store) = self.store(&job.db_name) else {
                warn!(db = %job.db_name, job = %job.uuid, "admitted job from unknown database");
                continue;
            };

            info!(job = %job.uuid, db = %job.db_name, "asking to run job");
            match store
                .transition(job.uuid, JobState::Pending, JobState::Enqueued)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(job = %job.uuid, db = %job.db_name, "job is not pending anymore, not dispatching");
                    continue;
                }
                Err(StoreError::NotFound(uuid)) => {
                    warn!(job = %uuid, db = %job.db_name, "admitted job disappeared");
                    self.manager.remove_job(uuid);
                    continue;
                }
                Err(err) => return Err(err.into()),
            }

            self.dispatcher
                .dispatch(DispatchRequest {
                    db_name: job.db_name.clone(),
                    uuid: job.uuid,
                    store,
                })
                .await?;
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Wait for a notification, the next wakeup time or a stop request.
    ///
    /// Never waits longer than `select_timeout`.
    pub async fn wait_notification(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            return Ok(());
        }

        let timeout = match self.manager.get_wakeup_time() {
            Some(wakeup) => (wakeup - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.options.select_timeout),
            None => self.options.select_timeout,
        };
        debug!(timeout_secs = timeout.as_secs_f64(), "waiting for notifications");

        let wake = self.handle.notified();
        let rx = self.notifications.as_mut().ok_or_else(not_listening)?;
        let received = tokio::select! {
            msg = rx.recv() => Some(msg),
            _ = tokio::time::sleep(timeout) => None,
            _ = wake.notified() => None,
        };

        match received {
            Some(Some(notification)) => self.pending.push_back(notification),
            Some(None) => return Err(stream_closed()),
            None => {}
        }
        Ok(())
    }

    /// True when no store has a job that could still become runnable.
    async fn is_idle(&self) -> Result<bool> {
        for store in &self.stores {
            let busy = store.select_jobs(JobState::RUNNABLE.to_vec()).await?;
            if !busy.is_empty() {
                return Ok(false);
            }

            // a parent may be done while its children were not released yet
            let waiting = store.select_jobs(vec![JobState::WaitDependencies]).await?;
            for record in waiting {
                let job = store.load(record.uuid).await?;
                let parents = store
                    .load_many(job.depends_on.iter().copied().collect())
                    .await?;
                if parents.iter().all(Job::is_done) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn pause(&self, delay: Duration) {
        if self.handle.is_stopped() {
            return;
        }
        let wake = self.handle.notified();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wake.notified() => {}
        }
    }

    fn store(&self, db_name: &str) -> Option<Arc<dyn JobStore>> {
        self.stores
            .iter()
            .find(|store| store.db_name() == db_name)
            .cloned()
    }
}

fn not_listening() -> QueueError {
    QueueError::Store(StoreError::Unavailable(
        "runner is not listening for notifications".to_string(),
    ))
}

fn stream_closed() -> QueueError {
    QueueError::Store(StoreError::Unavailable(
        "notification stream closed".to_string(),
    ))
}
