// src/config/channels.rs

//! Parser for the channel topology string.
//!
//! ```text
//! root:4,root.exports:2:throttle=5,root.exports.urgent:1:sequential
//! ```
//!
//! Entries are separated by `,` or newlines. Each entry is
//! `name[:capacity[:key[=value]]*]`; the capacity defaults to 1 and a bare
//! key means `true`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::errors::{QueueError, Result};

static CHANNEL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+)*$").expect("valid channel name regex")
});

/// Configuration of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Full or root-relative dot path, e.g. `root.exports` or `exports`.
    pub name: String,
    /// `None` or `Some(0)` mean unbounded.
    pub capacity: Option<usize>,
    pub sequential: bool,
    /// Seconds between two admissions.
    pub throttle: u64,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, capacity: Option<usize>) -> Self {
        Self {
            name: name.into(),
            capacity,
            sequential: false,
            throttle: 0,
        }
    }
}

pub fn parse_simple_config(config_string: &str) -> Result<Vec<ChannelConfig>> {
    let mut configs = Vec::new();

    for entry in config_string.split([',', '\n']).map(str::trim) {
        if entry.is_empty() {
            continue;
        }

        let mut items = entry.split(':').map(str::trim);
        let name = items.next().unwrap_or_default();
        if name.is_empty() {
            return Err(invalid(entry, "missing channel name"));
        }
        if !CHANNEL_NAME.is_match(name) {
            return Err(invalid(entry, &format!("invalid channel name '{name}'")));
        }

        let mut config = ChannelConfig::new(name, Some(1));
        if let Some(capacity) = items.next() {
            let capacity = capacity
                .parse::<usize>()
                .map_err(|_| invalid(entry, &format!("invalid capacity '{capacity}'")))?;
            config.capacity = Some(capacity);
        }

        let mut seen = HashSet::new();
        for item in items {
            let kv: Vec<&str> = item.split('=').map(str::trim).collect();
            let (key, value) = match kv.as_slice() {
                [key] => (*key, None),
                [key, value] => (*key, Some(*value)),
                _ => return Err(invalid(entry, &format!("incorrect config item '{item}'"))),
            };
            if !seen.insert(key) {
                return Err(invalid(entry, &format!("duplicate key '{key}'")));
            }
            match key {
                "sequential" => config.sequential = parse_flag(entry, key, value)?,
                "throttle" => {
                    let value = value.unwrap_or("1");
                    config.throttle = value
                        .parse::<u64>()
                        .map_err(|_| invalid(entry, &format!("invalid throttle '{value}'")))?;
                }
                other => return Err(invalid(entry, &format!("unknown key '{other}'"))),
            }
        }

        configs.push(config);
    }

    Ok(configs)
}

fn parse_flag(entry: &str, key: &str, value: Option<&str>) -> Result<bool> {
    match value.map(str::to_lowercase).as_deref() {
        None | Some("true") | Some("1") | Some("yes") => Ok(true),
        Some("false") | Some("0") | Some("no") => Ok(false),
        Some(other) => Err(invalid(entry, &format!("invalid value '{other}' for '{key}'"))),
    }
}

fn invalid(entry: &str, reason: &str) -> QueueError {
    QueueError::ConfigError(format!("invalid channel config {entry}: {reason}"))
}
