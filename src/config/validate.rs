// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::channels::parse_simple_config;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{QueueError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = QueueError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_runner(&raw)?;
        validate_functions(&raw)?;
        validate_seed_dependencies(&raw)?;
        validate_seed_dag(&raw)?;
        let channels = match raw.runner.channels.as_deref() {
            Some(channels) => parse_simple_config(channels)?,
            None => Vec::new(),
        };
        Ok(ConfigFile::new_unchecked(raw, channels))
    }
}

fn validate_runner(cfg: &RawConfigFile) -> Result<()> {
    let runner = &cfg.runner;
    if runner.databases.is_empty() {
        return Err(QueueError::ConfigError(
            "[runner].databases must list at least one database".to_string(),
        ));
    }
    if runner.select_timeout == 0 {
        return Err(QueueError::ConfigError(
            "[runner].select_timeout must be > 0 (got 0)".to_string(),
        ));
    }
    if !(runner.dispatch_timeout.is_finite() && runner.dispatch_timeout > 0.0) {
        return Err(QueueError::ConfigError(format!(
            "[runner].dispatch_timeout must be > 0 (got {})",
            runner.dispatch_timeout
        )));
    }
    Ok(())
}

fn validate_functions(cfg: &RawConfigFile) -> Result<()> {
    for (name, function) in cfg.function.iter() {
        let Some(pattern) = &function.retry_pattern else {
            continue;
        };
        for count in pattern.keys() {
            if count.parse::<u32>().is_err() {
                return Err(QueueError::ConfigError(format!(
                    "function '{name}' has invalid retry_pattern key '{count}' (expected a retry count)"
                )));
            }
        }
    }
    Ok(())
}

fn validate_seed_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, job) in cfg.job.iter() {
        for dep in job.after.iter() {
            if dep == name {
                return Err(QueueError::ConfigError(format!(
                    "job '{name}' cannot depend on itself in `after`"
                )));
            }
            if !cfg.job.contains_key(dep) {
                return Err(QueueError::ConfigError(format!(
                    "job '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_seed_dag(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> job.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.job.keys() {
        graph.add_node(name.as_str());
    }
    for (name, job) in cfg.job.iter() {
        for dep in job.after.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(QueueError::DagCycle(format!(
            "cycle detected in seeded jobs involving job '{}'",
            cycle.node_id()
        ))),
    }
}
