// src/job/mod.rs

//! In-memory job model.
//!
//! - [`model`] holds the [`Job`] record, its state transitions and the
//!   generic eta-first ordering.
//! - [`retry`] resolves postpone delays from retry patterns.
//! - [`function`] is the registry of job functions and the error type
//!   job handlers report back with.
//! - [`identity`] computes deduplication keys.

pub mod function;
pub mod identity;
pub mod model;
pub mod retry;

pub use function::{FunctionRegistry, JobError, JobFunction, JobHandler};
pub use identity::identity_exact;
pub use model::{cmp_eta_first, FailureInfo, IdentityKey, Job, JobOptions, WorkDescriptor};
pub use retry::{RetryDelay, RetryPolicy};
