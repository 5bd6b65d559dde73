// src/channels/channel.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::channels::channel_job::{ChannelId, ChannelJob, ChannelJobId};
use crate::channels::queue::ChannelQueue;
use crate::config::channels::ChannelConfig;
use crate::errors::{QueueError, Result};

/// One admission-control node of the channel tree.
///
/// `capacity` bounds the number of running jobs; `None` and `Some(0)` both
/// mean unbounded. A sequential channel has capacity 1 and admits nothing
/// while one of its jobs is failed. A throttled channel admits at most one
/// job per throttle window.
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    fullname: String,
    parent: Option<ChannelId>,
    children: BTreeMap<String, ChannelId>,
    pub capacity: Option<usize>,
    pub sequential: bool,
    pub throttle: TimeDelta,
    queue: ChannelQueue,
    running: HashMap<ChannelJobId, ChannelJob>,
    failed: HashMap<ChannelJobId, ChannelJob>,
    pause_until: Option<DateTime<Utc>>,
}

impl Channel {
    fn new(name: &str, parent: Option<(ChannelId, &str)>, capacity: Option<usize>) -> Self {
        let fullname = match parent {
            Some((_, parent_fullname)) => format!("{parent_fullname}.{name}"),
            None => name.to_string(),
        };
        Self {
            name: name.to_string(),
            fullname,
            parent: parent.map(|(id, _)| id),
            children: BTreeMap::new(),
            capacity,
            sequential: false,
            throttle: TimeDelta::zero(),
            queue: ChannelQueue::default(),
            running: HashMap::new(),
            failed: HashMap::new(),
            pause_until: None,
        }
    }

    /// Dot path from the root, e.g. `root.exports.urgent`.
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    pub fn parent(&self) -> Option<ChannelId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, ChannelId)> {
        self.children.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn configure(&mut self, config: &ChannelConfig) -> Result<()> {
        if config.sequential && config.capacity != Some(1) {
            return Err(QueueError::ConfigError(format!(
                "a sequential channel must have a capacity of 1 (channel '{}')",
                config.name
            )));
        }
        self.capacity = config.capacity;
        self.sequential = config.sequential;
        self.queue.sequential = config.sequential;
        self.throttle = TimeDelta::try_seconds(i64::try_from(config.throttle).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX);
        Ok(())
    }

    pub fn has_capacity(&self) -> bool {
        if self.sequential && !self.failed.is_empty() {
            return false;
        }
        match self.capacity {
            None | Some(0) => true,
            Some(capacity) => self.running.len() < capacity,
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn failed_len(&self) -> usize {
        self.failed.len()
    }

    pub fn pause_until(&self) -> Option<DateTime<Utc>> {
        self.pause_until
    }

    pub fn is_queued(&self, id: ChannelJobId) -> bool {
        self.queue.contains(id)
    }

    pub fn is_running(&self, id: ChannelJobId) -> bool {
        self.running.contains_key(&id)
    }

    pub fn is_failed(&self, id: ChannelJobId) -> bool {
        self.failed.contains_key(&id)
    }

    fn forget(&mut self, id: ChannelJobId) {
        self.queue.remove(id);
        self.running.remove(&id);
        self.failed.remove(&id);
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let capacity = match self.capacity {
            None | Some(0) => "∞".to_string(),
            Some(c) => c.to_string(),
        };
        write!(
            f,
            "{}(C:{},Q:{},R:{},F:{})",
            self.fullname,
            capacity,
            self.queue.len(),
            self.running.len(),
            self.failed.len()
        )
    }
}

/// Arena holding every channel; parents and children refer to each other by
/// [`ChannelId`].
///
/// All operations that walk the hierarchy live here, since they need to
/// touch a channel and its ancestors or descendants.
#[derive(Debug, Clone)]
pub struct ChannelTree {
    channels: Vec<Channel>,
}

impl ChannelTree {
    /// A tree holding only the root channel.
    pub fn new(root_name: &str, root_capacity: Option<usize>) -> Self {
        Self {
            channels: vec![Channel::new(root_name, None, root_capacity)],
        }
    }

    pub fn get(&self, id: ChannelId) -> &Channel {
        &self.channels[id.0]
    }

    pub fn get_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.channels[id.0]
    }

    pub fn root(&self) -> &Channel {
        self.get(ChannelId::ROOT)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn subchannel(&self, parent: ChannelId, name: &str) -> Option<ChannelId> {
        self.get(parent).children.get(name).copied()
    }

    /// Create a child channel of `parent`.
    pub fn add_child(&mut self, parent: ChannelId, name: &str, capacity: Option<usize>) -> ChannelId {
        if let Some(existing) = self.subchannel(parent, name) {
            return existing;
        }
        let id = ChannelId(self.channels.len());
        let channel = {
            let parent_channel = self.get(parent);
            Channel::new(name, Some((parent, parent_channel.fullname.as_str())), capacity)
        };
        self.channels.push(channel);
        self.get_mut(parent).children.insert(name.to_string(), id);
        id
    }

    /// Depth-first walk from the root, children in name order.
    pub fn walk(&self) -> Vec<ChannelId> {
        let mut order = Vec::with_capacity(self.channels.len());
        let mut stack = vec![ChannelId::ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.get(id).children.values().rev().copied());
        }
        order
    }

    /// Queue a job in `channel` and release it from every ancestor.
    pub fn set_pending(&mut self, channel: ChannelId, job: &ChannelJob) {
        let ch = self.get_mut(channel);
        if ch.queue.contains(job.id) {
            return;
        }
        ch.queue.add(job.clone());
        ch.running.remove(&job.id);
        ch.failed.remove(&job.id);
        debug!(job = %job.uuid, channel = %ch.fullname, "job marked pending");
        if let Some(parent) = ch.parent {
            self.remove(parent, job.id);
        }
    }

    /// Mark a job running in `channel` and all its ancestors.
    ///
    /// A child may already run a job its parent still queues, so the walk
    /// always continues upwards.
    pub fn set_running(&mut self, channel: ChannelId, job: &ChannelJob) {
        let ch = self.get_mut(channel);
        if !ch.running.contains_key(&job.id) {
            ch.queue.remove(job.id);
            ch.failed.remove(&job.id);
            ch.running.insert(job.id, job.clone());
            debug!(job = %job.uuid, channel = %ch.fullname, "job marked running");
        }
        if let Some(parent) = ch.parent {
            self.set_running(parent, job);
        }
    }

    /// Mark a job failed in `channel` and release it from every ancestor.
    pub fn set_failed(&mut self, channel: ChannelId, job: &ChannelJob) {
        let ch = self.get_mut(channel);
        if ch.failed.contains_key(&job.id) {
            return;
        }
        ch.queue.remove(job.id);
        ch.running.remove(&job.id);
        ch.failed.insert(job.id, job.clone());
        debug!(job = %job.uuid, channel = %ch.fullname, "job marked failed");
        if let Some(parent) = ch.parent {
            self.remove(parent, job.id);
        }
    }

    pub fn set_done(&mut self, channel: ChannelId, job: &ChannelJob) {
        debug!(job = %job.uuid, channel = %self.get(channel).fullname, "job marked done");
        self.remove(channel, job.id);
    }

    /// Forget a job in `channel` and every ancestor.
    pub fn remove(&mut self, channel: ChannelId, id: ChannelJobId) {
        let mut current = Some(channel);
        while let Some(channel) = current {
            let ch = self.get_mut(channel);
            ch.forget(id);
            current = ch.parent;
        }
    }

    /// Admit jobs from `channel` and its subtree.
    ///
    /// Children are drained first: what they admit lands in this channel's
    /// queue and competes there under this channel's capacity. Every call
    /// mutates state, so the result is only valid for the call that made it.
    pub fn get_jobs_to_run(&mut self, channel: ChannelId, now: DateTime<Utc>) -> Vec<ChannelJob> {
        let children: Vec<ChannelId> = self.get(channel).children.values().copied().collect();
        for child in children {
            for job in self.get_jobs_to_run(child, now) {
                self.get_mut(channel).queue.add(job);
            }
        }

        let ch = self.get_mut(channel);
        if let Some(until) = ch.pause_until {
            if now < until {
                if ch.has_capacity() {
                    debug!(channel = %ch.fullname, %until, "channel paused");
                }
                return Vec::new();
            }
            ch.pause_until = None;
        }

        let mut admitted = Vec::new();
        while ch.has_capacity() {
            let Some(job) = ch.queue.pop(now) else {
                break;
            };
            debug!(job = %job.uuid, channel = %ch.fullname, "job ready");
            ch.running.insert(job.id, job.clone());
            admitted.push(job);
            if ch.throttle > TimeDelta::zero() {
                ch.pause_until = Some(now + ch.throttle);
                debug!(channel = %ch.fullname, throttle_secs = ch.throttle.num_seconds(), "pausing channel");
                break;
            }
        }
        admitted
    }

    /// Earliest time at which `channel`'s subtree could admit something
    /// without an external notification, folded into `candidate`.
    ///
    /// `None` means only a notification can change the outcome.
    pub fn get_wakeup_time(
        &mut self,
        channel: ChannelId,
        candidate: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let ch = self.get_mut(channel);
        if !ch.has_capacity() {
            // a finishing job notifies us anyway
            return candidate;
        }
        if let Some(until) = ch.pause_until {
            return Some(candidate.map_or(until, |c| c.min(until)));
        }

        let mut wakeup = ch.queue.get_wakeup_time(candidate);
        let children: Vec<ChannelId> = ch.children.values().copied().collect();
        for child in children {
            wakeup = self.get_wakeup_time(child, wakeup);
        }
        wakeup
    }

    /// Waiting jobs of a channel, in no particular order.
    pub fn queued_jobs(&self, channel: ChannelId) -> impl Iterator<Item = &ChannelJob> {
        self.get(channel).queue.jobs()
    }
}
