#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use jobqueue::config::{ConfigFile, JobSeed, RawConfigFile};
use jobqueue::job::{JobError, JobFunction};
use jobqueue::store::JobRecord;
use jobqueue::types::{JobState, DEFAULT_PRIORITY};
use serde_json::Value;
use uuid::Uuid;

use crate::at;

/// Builder for the scheduling record fed to `ChannelManager::notify`.
///
/// Defaults: fresh uuid, `Pending`, default priority, created at `t=0`.
pub struct RecordBuilder {
    record: JobRecord,
}

impl RecordBuilder {
    pub fn new(channel: &str) -> Self {
        Self {
            record: JobRecord {
                uuid: Uuid::new_v4(),
                channel: channel.to_string(),
                seq: 0,
                date_created: at(0),
                priority: DEFAULT_PRIORITY,
                eta: None,
                state: JobState::Pending,
            },
        }
    }

    pub fn seq(mut self, seq: u64) -> Self {
        self.record.seq = seq;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.record.priority = priority;
        self
    }

    pub fn created(mut self, secs: i64) -> Self {
        self.record.date_created = at(secs);
        self
    }

    pub fn eta(mut self, secs: i64) -> Self {
        self.record.eta = Some(at(secs));
        self
    }

    pub fn state(mut self, state: JobState) -> Self {
        self.record.state = state;
        self
    }

    pub fn build(self) -> JobRecord {
        self.record
    }
}

/// The same record in another state.
pub fn with_state(record: &JobRecord, state: JobState) -> JobRecord {
    JobRecord {
        state,
        ..record.clone()
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_channels(mut self, channels: &str) -> Self {
        self.config.runner.channels = Some(channels.to_string());
        self
    }

    pub fn with_databases(mut self, databases: &[&str]) -> Self {
        self.config.runner.databases = databases.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_job(mut self, name: &str, seed: JobSeed) -> Self {
        self.config.job.insert(name.to_string(), seed);
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a `[job.<name>]` seed.
pub struct JobSeedBuilder {
    seed: JobSeed,
}

impl JobSeedBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            seed: JobSeed {
                cmd: cmd.to_string(),
                channel: None,
                priority: None,
                max_retries: None,
                delay: None,
                after: Vec::new(),
            },
        }
    }

    pub fn channel(mut self, channel: &str) -> Self {
        self.seed.channel = Some(channel.to_string());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.seed.priority = Some(priority);
        self
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.seed.after = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn build(self) -> JobSeed {
        self.seed
    }
}

/// Shared log of job descriptions, in execution order.
pub type ExecutionLog = Arc<Mutex<Vec<String>>>;

/// A job function that appends the job description to `log` and succeeds.
pub fn recording_function(name: &str, log: ExecutionLog) -> JobFunction {
    JobFunction::new(name, move |job| {
        let description = job.description.clone().unwrap_or_default();
        log.lock().unwrap().push(description.clone());
        Ok(Value::String(description))
    })
}

/// A job function that always fails with `message`.
pub fn failing_function(name: &str, message: &str) -> JobFunction {
    let message = message.to_string();
    JobFunction::new(name, move |_| Err(JobError::Failed(message.clone())))
}

/// A job function that asks for a retry after `seconds`.
pub fn retrying_function(name: &str, seconds: u64) -> JobFunction {
    JobFunction::new(name, move |_| {
        Err(JobError::retry_later("not ready yet").after(seconds))
    })
}
