// src/channels/mod.rs

//! Hierarchical admission control.
//!
//! Jobs are tracked per channel as lightweight [`ChannelJob`] records. Each
//! channel queues its waiting jobs ([`ChannelQueue`]) and admits them under
//! its capacity, sequential and throttle settings. Admitted jobs then flow
//! into the parent channel's queue, up to the root, which makes every
//! ancestor's capacity bind as well.
//!
//! - [`priority_queue`]: deletion-tolerant heap.
//! - [`queue`]: ready queue + eta queue of one channel.
//! - [`channel`]: the channel node and the arena tree walking operations.
//! - [`manager`]: name resolution, notification routing, the runner's entry
//!   points.

pub mod channel;
pub mod channel_job;
pub mod manager;
pub mod priority_queue;
pub mod queue;

pub use channel::{Channel, ChannelTree};
pub use channel_job::{ChannelId, ChannelJob, ChannelJobId};
pub use manager::ChannelManager;
pub use priority_queue::{PriorityQueue, QueueEntry};
pub use queue::ChannelQueue;
