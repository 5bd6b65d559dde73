// src/exec/dependencies.rs

use std::time::Duration;

use rand::Rng;
use tracing::info;
use uuid::Uuid;

use crate::errors::Result;
use crate::store::{JobStore, StoreError};

/// Retry settings for dependency propagation on concurrent updates.
///
/// Try `n` (0-based) waits a random duration in `[0, base * 2^n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRetry {
    pub max_tries: u32,
    pub base: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            max_tries: 5,
            base: Duration::from_secs(1),
        }
    }
}

/// Move the waiting children of a finished job to `Pending`.
///
/// Conflicts reported by the store are retried with a jittered exponential
/// backoff; any other error, or a conflict after `max_tries` retries, is
/// returned.
pub async fn enqueue_waiting(
    store: &dyn JobStore,
    uuid: Uuid,
    retry: ConflictRetry,
) -> Result<Vec<Uuid>> {
    let mut tries = 0;
    loop {
        match store.enqueue_waiting(uuid).await {
            Ok(children) => return Ok(children),
            Err(StoreError::Conflict(reason)) => {
                if tries >= retry.max_tries {
                    info!(job = %uuid, %reason, "maximum number of tries reached to update dependencies");
                    return Err(StoreError::Conflict(reason).into());
                }
                let factor = rand::rng().random_range(0.0..f64::from(1u32 << tries.min(31)));
                let wait = retry.base.mul_f64(factor);
                tries += 1;
                info!(
                    job = %uuid,
                    %reason,
                    "retry {}/{} in {:.4} sec...",
                    tries,
                    retry.max_tries,
                    wait.as_secs_f64()
                );
                tokio::time::sleep(wait).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}
