// src/job/retry.rs

//! Postpone delays for retried jobs.

use std::collections::BTreeMap;

use rand::Rng;
use serde::Deserialize;

use crate::types::RETRY_INTERVAL;

/// A postpone delay: either a fixed number of seconds or a `[min, max]`
/// range drawn uniformly each time it is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RetryDelay {
    Fixed(u64),
    Range(u64, u64),
}

impl RetryDelay {
    /// Resolve the delay to a concrete number of seconds.
    pub fn seconds(&self) -> u64 {
        match *self {
            RetryDelay::Fixed(secs) => secs,
            RetryDelay::Range(a, b) => {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                rand::rng().random_range(lo..=hi)
            }
        }
    }
}

impl From<u64> for RetryDelay {
    fn from(secs: u64) -> Self {
        RetryDelay::Fixed(secs)
    }
}

/// Retry pattern of a job function plus the fallback interval.
///
/// The pattern maps a retry count threshold to a delay. For a job at retry
/// `n`, the entry with the greatest threshold `<= n` applies; below the
/// smallest threshold (or with an empty pattern) the default interval is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub default_interval: u64,
    pub pattern: BTreeMap<u32, RetryDelay>,
}

impl RetryPolicy {
    pub fn new(pattern: BTreeMap<u32, RetryDelay>) -> Self {
        Self {
            default_interval: RETRY_INTERVAL,
            pattern,
        }
    }

    pub fn with_default_interval(mut self, seconds: u64) -> Self {
        self.default_interval = seconds;
        self
    }

    /// Delay that applies to a job that has been tried `retry` times.
    pub fn delay_for(&self, retry: u32) -> RetryDelay {
        self.pattern
            .range(..=retry)
            .next_back()
            .map(|(_, delay)| *delay)
            .unwrap_or(RetryDelay::Fixed(self.default_interval))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}
