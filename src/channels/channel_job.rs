// src/channels/channel_job.rs

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::channels::priority_queue::QueueEntry;

/// Identity of one tracking record.
///
/// A job keeps its uuid forever, but whenever one of its scheduling fields
/// changes the manager drops the old record and mints a new id, so queue
/// keys never change under an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelJobId(pub u64);

/// Index of a channel in the channel tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub usize);

impl ChannelId {
    pub const ROOT: ChannelId = ChannelId(0);
}

/// Ready queue ordering: `(priority, date_created, seq)`.
pub type ReadyKey = (i32, DateTime<Utc>, u64);

/// Eta queue ordering: `(eta, priority, date_created, seq)`.
pub type EtaKey = (DateTime<Utc>, i32, DateTime<Utc>, u64);

/// The scheduling view of a job, as tracked by the channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelJob {
    pub id: ChannelJobId,
    pub db_name: String,
    pub channel: ChannelId,
    pub uuid: Uuid,
    pub seq: u64,
    pub date_created: DateTime<Utc>,
    pub priority: i32,
    pub eta: Option<DateTime<Utc>>,
}

impl ChannelJob {
    pub fn ready_key(&self) -> ReadyKey {
        (self.priority, self.date_created, self.seq)
    }

    /// Eta-first key; jobs without eta sort as if due at the epoch.
    pub fn eta_key(&self) -> EtaKey {
        (
            self.eta.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            self.priority,
            self.date_created,
            self.seq,
        )
    }
}

impl QueueEntry for ChannelJob {
    fn entry_id(&self) -> ChannelJobId {
        self.id
    }
}

impl fmt::Display for ChannelJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ChannelJob {}>", self.uuid)
    }
}
