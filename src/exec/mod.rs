// src/exec/mod.rs

//! Execution layer.
//!
//! - [`backend`] provides the `ExecutionDispatcher` trait the runner hands
//!   admitted jobs to, with a local and an HTTP implementation.
//! - [`worker`] runs one job: start, perform, record the outcome.
//! - [`dependencies`] propagates completion to waiting children, retrying
//!   on store conflicts.
//! - [`shell`] is the built-in `shell.run` job function.

pub mod backend;
pub mod dependencies;
pub mod shell;
pub mod worker;

pub use backend::{DispatchRequest, ExecutionDispatcher, HttpDispatcher, HttpTarget, LocalDispatcher};
pub use dependencies::{enqueue_waiting, ConflictRetry};
pub use shell::{shell_function, SHELL_FUNCTION};
pub use worker::{run_job, JobOutcome, NOTHING_TO_DO};
