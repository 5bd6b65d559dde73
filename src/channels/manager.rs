// src/channels/manager.rs

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::channels::channel::{Channel, ChannelTree};
use crate::channels::channel_job::{ChannelId, ChannelJob, ChannelJobId};
use crate::config::channels::{parse_simple_config, ChannelConfig};
use crate::errors::{QueueError, Result};
use crate::store::JobRecord;
use crate::types::JobState;

const ROOT: &str = "root";

/// Owns the channel tree and the scheduling records of every tracked job.
///
/// With `root:4,A:4,B:1`, six jobs in `A` and two higher priority jobs in
/// `B`, one call to [`get_jobs_to_run`](Self::get_jobs_to_run) admits `B1`
/// then `A1`..`A3`: `B` and `A` each hand over what their own capacity
/// allows, and the root picks by priority under its capacity of 4.
#[derive(Debug, Clone)]
pub struct ChannelManager {
    tree: ChannelTree,
    by_name: HashMap<String, ChannelId>,
    jobs: HashMap<Uuid, ChannelJob>,
    next_job_id: u64,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelManager {
    /// A manager holding only the root channel, with capacity 1.
    pub fn new() -> Self {
        let mut by_name = HashMap::new();
        by_name.insert(ROOT.to_string(), ChannelId::ROOT);
        Self {
            tree: ChannelTree::new(ROOT, Some(1)),
            by_name,
            jobs: HashMap::new(),
            next_job_id: 0,
        }
    }

    /// Apply a channel topology string such as `root:4,root.exports:2`.
    pub fn simple_configure(&mut self, config_string: &str) -> Result<()> {
        for config in parse_simple_config(config_string)? {
            self.configure_channel(&config)?;
        }
        Ok(())
    }

    pub fn configure_channel(&mut self, config: &ChannelConfig) -> Result<ChannelId> {
        let id = self.get_channel_by_name(&config.name, true, false)?;
        self.tree.get_mut(id).configure(config)?;
        debug!(channel = %self.tree.get(id), "channel configured");
        Ok(id)
    }

    /// Resolve a channel path. The `root.` prefix is optional.
    ///
    /// - `autocreate`: missing channels along the path are created, unbounded.
    /// - `parent_fallback`: an unknown path resolves to its closest known
    ///   ancestor (the root at worst) instead.
    ///
    /// Without either flag an unknown path is a [`QueueError::ChannelNotFound`].
    pub fn get_channel_by_name(
        &mut self,
        name: &str,
        autocreate: bool,
        parent_fallback: bool,
    ) -> Result<ChannelId> {
        if name.is_empty() || name == ROOT {
            return Ok(ChannelId::ROOT);
        }
        let fullname = if name.starts_with("root.") {
            name.to_string()
        } else {
            format!("{ROOT}.{name}")
        };
        if let Some(id) = self.by_name.get(&fullname) {
            return Ok(*id);
        }
        if !autocreate && !parent_fallback {
            return Err(QueueError::ChannelNotFound(fullname));
        }

        if parent_fallback {
            let mut parent_name = fullname.as_str();
            while let Some((prefix, _)) = parent_name.rsplit_once('.') {
                parent_name = prefix;
                if let Some(id) = self.by_name.get(parent_name) {
                    debug!(channel = %fullname, fallback = %parent_name, "channel not configured, using parent");
                    return Ok(*id);
                }
            }
            return Ok(ChannelId::ROOT);
        }

        let mut current = ChannelId::ROOT;
        for part in fullname.split('.').skip(1) {
            current = match self.tree.subchannel(current, part) {
                Some(id) => id,
                None => {
                    let id = self.tree.add_child(current, part, None);
                    self.by_name
                        .insert(self.tree.get(id).fullname().to_string(), id);
                    id
                }
            };
        }
        Ok(current)
    }

    /// Upsert the scheduling record of a job and route its state to its
    /// channel.
    ///
    /// A change of channel, priority, eta or seq drops the old record and
    /// queues a fresh one. `Done` and `Cancelled` jobs stop being tracked;
    /// `WaitDependencies` jobs are tracked but never queued.
    pub fn notify(&mut self, db_name: &str, record: &JobRecord) {
        let channel = match self.get_channel_by_name(&record.channel, false, true) {
            Ok(id) => id,
            Err(err) => {
                warn!(channel = %record.channel, job = %record.uuid, error = %err, "unknown channel, using root");
                ChannelId::ROOT
            }
        };

        if let Some(job) = self.jobs.get(&record.uuid) {
            if job.seq != record.seq
                || job.priority != record.priority
                || job.eta != record.eta
                || job.channel != channel
                || job.db_name != db_name
            {
                debug!(job = %record.uuid, "job properties changed, rescheduling it");
                self.remove_job(record.uuid);
            }
        }

        let job = match self.jobs.get(&record.uuid) {
            Some(job) => job.clone(),
            None => {
                self.next_job_id += 1;
                let job = ChannelJob {
                    id: ChannelJobId(self.next_job_id),
                    db_name: db_name.to_string(),
                    channel,
                    uuid: record.uuid,
                    seq: record.seq,
                    date_created: record.date_created,
                    priority: record.priority,
                    eta: record.eta,
                };
                self.jobs.insert(record.uuid, job.clone());
                job
            }
        };

        match record.state {
            JobState::Done | JobState::Cancelled => {
                self.tree.set_done(job.channel, &job);
                self.jobs.remove(&job.uuid);
            }
            JobState::Pending => self.tree.set_pending(job.channel, &job),
            JobState::Enqueued | JobState::Started => self.tree.set_running(job.channel, &job),
            JobState::Failed => self.tree.set_failed(job.channel, &job),
            JobState::WaitDependencies => {}
        }
    }

    /// Stop tracking a job; it is removed from every channel.
    pub fn remove_job(&mut self, uuid: Uuid) {
        if let Some(job) = self.jobs.remove(&uuid) {
            self.tree.remove(job.channel, job.id);
        }
    }

    /// Stop tracking every job of a database.
    pub fn remove_db(&mut self, db_name: &str) {
        let uuids: Vec<Uuid> = self
            .jobs
            .values()
            .filter(|job| job.db_name == db_name)
            .map(|job| job.uuid)
            .collect();
        for uuid in uuids {
            self.remove_job(uuid);
        }
    }

    pub fn get_jobs_to_run(&mut self, now: DateTime<Utc>) -> Vec<ChannelJob> {
        self.tree.get_jobs_to_run(ChannelId::ROOT, now)
    }

    /// Next time the runner must poll even without notification.
    pub fn get_wakeup_time(&mut self) -> Option<DateTime<Utc>> {
        self.tree.get_wakeup_time(ChannelId::ROOT, None)
    }

    pub fn tracked_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn tracked_job(&self, uuid: Uuid) -> Option<&ChannelJob> {
        self.jobs.get(&uuid)
    }

    pub fn channel(&self, id: ChannelId) -> &Channel {
        self.tree.get(id)
    }

    /// Look up a configured channel without creating anything.
    pub fn channel_by_name(&self, name: &str) -> Option<&Channel> {
        let fullname = if name == ROOT || name.starts_with("root.") {
            name.to_string()
        } else {
            format!("{ROOT}.{name}")
        };
        self.by_name.get(&fullname).map(|id| self.tree.get(*id))
    }

    pub fn root(&self) -> &Channel {
        self.tree.root()
    }

    pub fn tree(&self) -> &ChannelTree {
        &self.tree
    }
}

impl fmt::Display for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in self.tree.walk() {
            let channel = self.tree.get(id);
            let depth = channel.fullname().matches('.').count();
            let mut flags = Vec::new();
            if channel.sequential {
                flags.push("sequential".to_string());
            }
            if channel.throttle.num_seconds() > 0 {
                flags.push(format!("throttle={}s", channel.throttle.num_seconds()));
            }
            write!(f, "{:indent$}{}", "", channel, indent = depth * 2)?;
            if !flags.is_empty() {
                write!(f, " [{}]", flags.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
