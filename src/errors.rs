// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;
use uuid::Uuid;

use crate::job::JobError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Job {0} cannot depend on itself")]
    SelfDependency(String),

    #[error("Jobs cannot have dependencies between several graphs")]
    MixedGraphs,

    #[error("Job {0} is a single job, it should not have a graph uuid")]
    SingleJobWithGraph(Uuid),

    #[error("Expecting jobs")]
    EmptyGraph,

    #[error("Cycle detected in job graph: {0}")]
    DagCycle(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job failed: {0}")]
    Job(#[from] JobError),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, QueueError>;
