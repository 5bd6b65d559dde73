// src/channels/queue.rs

use chrono::{DateTime, Utc};

use crate::channels::channel_job::{ChannelJob, ChannelJobId, EtaKey, ReadyKey};
use crate::channels::priority_queue::PriorityQueue;

/// Waiting jobs of one channel.
///
/// Jobs with an eta wait in the eta queue until due; the others sit in the
/// ready queue. A job is never in both.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    ready: PriorityQueue<ReadyKey, ChannelJob>,
    eta: PriorityQueue<EtaKey, ChannelJob>,
    pub sequential: bool,
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ChannelQueue {
    pub fn new(sequential: bool) -> Self {
        Self {
            ready: PriorityQueue::new(ChannelJob::ready_key),
            eta: PriorityQueue::new(ChannelJob::eta_key),
            sequential,
        }
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.eta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ChannelJobId) -> bool {
        self.ready.contains(id) || self.eta.contains(id)
    }

    pub fn add(&mut self, job: ChannelJob) {
        if job.eta.is_some() {
            self.eta.add(job);
        } else {
            self.ready.add(job);
        }
    }

    pub fn remove(&mut self, id: ChannelJobId) {
        self.ready.remove(id);
        self.eta.remove(id);
    }

    /// Pop the next job allowed to run at `now`.
    ///
    /// Due eta jobs move to the ready queue first. A sequential queue refuses
    /// to pop while any not-yet-due eta job would outrank the ready head on
    /// `(priority, date_created, seq)`, not only the one due first.
    pub fn pop(&mut self, now: DateTime<Utc>) -> Option<ChannelJob> {
        while self
            .eta
            .peek()
            .is_some_and(|job| job.eta.is_none_or(|eta| eta <= now))
        {
            if let Some(mut job) = self.eta.pop() {
                job.eta = None;
                self.ready.add(job);
            }
        }

        if self.sequential {
            let waiting = self.eta.iter().map(ChannelJob::ready_key).min();
            let ready_head = self.ready.peek().map(ChannelJob::ready_key);
            if let (Some(waiting), Some(ready_key)) = (waiting, ready_head) {
                if waiting < ready_key {
                    return None;
                }
            }
        }

        self.ready.pop()
    }

    /// Earliest eta of the queue folded into `candidate`.
    pub fn get_wakeup_time(&mut self, candidate: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match (self.eta.peek().and_then(|job| job.eta), candidate) {
            (Some(eta), Some(wakeup)) => Some(eta.min(wakeup)),
            (Some(eta), None) => Some(eta),
            (None, wakeup) => wakeup,
        }
    }

    /// All waiting jobs, in no particular order.
    pub fn jobs(&self) -> impl Iterator<Item = &ChannelJob> {
        self.ready.iter().chain(self.eta.iter())
    }
}
