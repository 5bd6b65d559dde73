// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::config::channels::ChannelConfig;
use crate::exec::HttpTarget;
use crate::job::{RetryDelay, RetryPolicy};
use crate::types::{DispatchMode, RETRY_INTERVAL};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [runner]
/// channels = "root:4,root.shell:2"
/// databases = ["main"]
///
/// [retry]
/// default_interval = 600
///
/// [function."shell.run"]
/// channel = "root.shell"
/// retry_pattern = { "1" = 10, "5" = [60, 120] }
///
/// [job.build]
/// cmd = "make"
/// after = ["fetch"]
/// ```
///
/// All sections are optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub runner: RunnerSection,

    #[serde(default)]
    pub retry: RetrySection,

    /// Per job function overrides, keyed by function name.
    #[serde(default)]
    pub function: BTreeMap<String, FunctionSection>,

    /// Jobs seeded into every database at startup, keyed by job name.
    #[serde(default)]
    pub job: BTreeMap<String, JobSeed>,
}

/// Validated configuration. Only obtainable through
/// `ConfigFile::try_from(RawConfigFile)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub runner: RunnerSection,
    pub retry: RetrySection,
    pub function: BTreeMap<String, FunctionSection>,
    pub job: BTreeMap<String, JobSeed>,
    /// `runner.channels`, parsed.
    pub channels: Vec<ChannelConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile, channels: Vec<ChannelConfig>) -> Self {
        Self {
            runner: raw.runner,
            retry: raw.retry,
            function: raw.function,
            job: raw.job,
            channels,
        }
    }

    /// Retry policy configured for `function`, if it has a retry pattern.
    pub fn retry_policy(&self, function: &str) -> Option<RetryPolicy> {
        let pattern = self.function.get(function)?.retry_pattern.as_ref()?;
        let pattern = pattern
            .iter()
            .filter_map(|(count, delay)| count.parse::<u32>().ok().map(|count| (count, *delay)))
            .collect();
        Some(RetryPolicy::new(pattern).with_default_interval(self.retry.default_interval))
    }

    /// Policy used by functions without their own pattern.
    pub fn default_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_default_interval(self.retry.default_interval)
    }
}

/// `[runner]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Channel topology string, see [`parse_simple_config`](crate::config::parse_simple_config).
    /// `None` means a root channel of capacity 1.
    #[serde(default)]
    pub channels: Option<String>,

    #[serde(default = "default_databases")]
    pub databases: Vec<String>,

    /// Seconds.
    #[serde(default = "default_select_timeout")]
    pub select_timeout: u64,

    /// Seconds.
    #[serde(default = "default_error_recovery_delay")]
    pub error_recovery_delay: u64,

    /// Seconds the HTTP dispatcher waits for the job endpoint.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout: f64,

    #[serde(default)]
    pub dispatch: DispatchMode,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8069
}

fn default_databases() -> Vec<String> {
    vec!["main".to_string()]
}

fn default_select_timeout() -> u64 {
    60
}

fn default_error_recovery_delay() -> u64 {
    5
}

fn default_dispatch_timeout() -> f64 {
    1.0
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            port: default_port(),
            user: None,
            password: None,
            channels: None,
            databases: default_databases(),
            select_timeout: default_select_timeout(),
            error_recovery_delay: default_error_recovery_delay(),
            dispatch_timeout: default_dispatch_timeout(),
            dispatch: DispatchMode::default(),
        }
    }
}

impl RunnerSection {
    pub fn http_target(&self) -> HttpTarget {
        HttpTarget {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }

    pub fn select_timeout(&self) -> Duration {
        Duration::from_secs(self.select_timeout)
    }

    pub fn error_recovery_delay(&self) -> Duration {
        Duration::from_secs(self.error_recovery_delay)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.dispatch_timeout)
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    /// Postpone delay (seconds) when no retry pattern entry applies.
    #[serde(default = "default_retry_interval")]
    pub default_interval: u64,
}

fn default_retry_interval() -> u64 {
    RETRY_INTERVAL
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            default_interval: default_retry_interval(),
        }
    }
}

/// `[function."<name>"]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionSection {
    /// Default channel of the jobs of this function.
    #[serde(default)]
    pub channel: Option<String>,

    /// Retry count threshold (as a string key, TOML tables only have string
    /// keys) to delay, e.g. `{ "1" = 10, "5" = [60, 120] }`.
    #[serde(default)]
    pub retry_pattern: Option<BTreeMap<String, RetryDelay>>,
}

/// `[job.<name>]` section: a `shell.run` job seeded at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSeed {
    /// Shell command line.
    pub cmd: String,

    #[serde(default)]
    pub channel: Option<String>,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Delay (seconds) before the job may run.
    #[serde(default)]
    pub delay: Option<u64>,

    /// Names of the seeded jobs this one waits for.
    #[serde(default)]
    pub after: Vec<String>,
}
