// src/channels/priority_queue.rs

//! A binary heap that tolerates removal of arbitrary entries.
//!
//! Removal is lazy: the entry is only forgotten, and its heap slot is purged
//! the next time it reaches the top on `pop` or `peek`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::channels::channel_job::ChannelJobId;

/// Something with a stable identity that can sit in a [`PriorityQueue`].
pub trait QueueEntry: Clone {
    fn entry_id(&self) -> ChannelJobId;
}

/// Min-heap of entries ordered by `K`, with ties broken by entry id.
///
/// An entry's key must not change while its id is in the queue.
#[derive(Debug, Clone)]
pub struct PriorityQueue<K, T> {
    key: fn(&T) -> K,
    heap: BinaryHeap<Reverse<(K, ChannelJobId)>>,
    items: HashMap<ChannelJobId, T>,
    removed: HashSet<ChannelJobId>,
}

impl<K: Ord + Clone, T: QueueEntry> PriorityQueue<K, T> {
    pub fn new(key: fn(&T) -> K) -> Self {
        Self {
            key,
            heap: BinaryHeap::new(),
            items: HashMap::new(),
            removed: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: ChannelJobId) -> bool {
        self.items.contains_key(&id)
    }

    /// Add an entry. No-op when it is already queued; an entry removed but
    /// not purged yet is revived in place.
    pub fn add(&mut self, item: T) {
        let id = item.entry_id();
        if self.items.contains_key(&id) {
            return;
        }
        if !self.removed.remove(&id) {
            self.heap.push(Reverse(((self.key)(&item), id)));
        }
        self.items.insert(id, item);
    }

    pub fn remove(&mut self, id: ChannelJobId) {
        if self.items.remove(&id).is_some() {
            self.removed.insert(id);
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        while let Some(Reverse((_, id))) = self.heap.pop() {
            if self.removed.remove(&id) {
                continue;
            }
            if let Some(item) = self.items.remove(&id) {
                return Some(item);
            }
        }
        None
    }

    pub fn peek(&mut self) -> Option<&T> {
        loop {
            let id = match self.heap.peek() {
                Some(Reverse((_, id))) => *id,
                None => return None,
            };
            if self.removed.remove(&id) {
                self.heap.pop();
                continue;
            }
            return self.items.get(&id);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }
}
