// src/lib.rs

pub mod channels;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod job;
pub mod logging;
pub mod queue;
pub mod store;
pub mod types;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use tracing::{debug, info};

use crate::channels::ChannelManager;
use crate::cli::CliArgs;
use crate::config::loader::{load_and_validate, load_with_channels};
use crate::config::model::ConfigFile;
use crate::dag::{JobGraph, NodeId};
use crate::engine::{Runner, RunnerOptions};
use crate::errors::QueueError;
use crate::exec::{shell_function, ExecutionDispatcher, HttpDispatcher, LocalDispatcher, SHELL_FUNCTION};
use crate::job::{FunctionRegistry, JobOptions, WorkDescriptor};
use crate::queue::JobQueue;
use crate::store::{JobStore, MemoryJobStore};
use crate::types::DispatchMode;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (file, `JOBQUEUE_CHANNELS`, `--channels`)
/// - the function registry and the channel tree
/// - one in-memory store per database, seeded with the `[job.*]` graph
/// - the dispatcher and the runner
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = match args.channels.clone() {
        Some(channels) => load_with_channels(&args.config, Some(channels))?,
        None => load_and_validate(&args.config)?,
    };

    let registry = Arc::new(build_registry(&cfg));
    let manager = build_channel_manager(&cfg)?;
    let seeds = SeedGraph::from_config(&cfg)?;

    if args.dry_run {
        print_dry_run(&cfg, &registry, &manager, &seeds)?;
        return Ok(());
    }

    let mut stores: Vec<Arc<dyn JobStore>> = Vec::with_capacity(cfg.runner.databases.len());
    for db_name in cfg.runner.databases.iter() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new(db_name.clone()));
        let seeded = seeds.delay_all(&JobQueue::new(Arc::clone(&store), Arc::clone(&registry))).await?;
        info!(db = %db_name, jobs = seeded, "database seeded");
        stores.push(store);
    }

    let options = RunnerOptions {
        select_timeout: cfg.runner.select_timeout(),
        error_recovery_delay: cfg.runner.error_recovery_delay(),
        exit_when_idle: args.once,
    };

    match cfg.runner.dispatch {
        DispatchMode::Local => {
            let dispatcher = LocalDispatcher::new(Arc::clone(&registry));
            serve(Runner::new(manager, stores, dispatcher, options)).await
        }
        DispatchMode::Http => {
            let dispatcher =
                HttpDispatcher::new(cfg.runner.http_target(), cfg.runner.dispatch_timeout())?;
            info!(url = %dispatcher.url(), "dispatching jobs over http");
            serve(Runner::new(manager, stores, dispatcher, options)).await
        }
    }
}

async fn serve<D: ExecutionDispatcher>(mut runner: Runner<D>) -> Result<()> {
    // Ctrl-C → graceful shutdown.
    let handle = runner.handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            return;
        }
        info!("shutdown requested");
        handle.stop();
    });

    runner.run().await?;
    Ok(())
}

/// Registry with the built-in functions and the `[function.*]` overrides.
pub fn build_registry(cfg: &ConfigFile) -> FunctionRegistry {
    let mut registry = FunctionRegistry::new().with_default_policy(cfg.default_retry_policy());
    registry.register(shell_function().with_retry_policy(cfg.default_retry_policy()));

    for (name, section) in cfg.function.iter() {
        if registry.get(name).is_none() {
            debug!(function = %name, "configuration for unknown function ignored");
            continue;
        }
        registry.configure(name, section.channel.clone(), cfg.retry_policy(name));
    }
    registry
}

pub fn build_channel_manager(cfg: &ConfigFile) -> crate::errors::Result<ChannelManager> {
    let mut manager = ChannelManager::new();
    for channel in cfg.channels.iter() {
        manager.configure_channel(channel)?;
    }
    Ok(manager)
}

/// The `[job.*]` seeds as one `shell.run` graph.
#[derive(Debug, Clone)]
pub struct SeedGraph {
    graph: JobGraph,
    nodes: BTreeMap<String, NodeId>,
}

impl SeedGraph {
    pub fn from_config(cfg: &ConfigFile) -> crate::errors::Result<Self> {
        let now = Utc::now();
        let mut graph = JobGraph::new();
        let mut nodes = BTreeMap::new();

        for (name, seed) in cfg.job.iter() {
            let mut options = JobOptions::new().description(name.clone());
            if let Some(channel) = &seed.channel {
                options = options.channel(channel.clone());
            }
            if let Some(priority) = seed.priority {
                options = options.priority(priority);
            }
            if let Some(max_retries) = seed.max_retries {
                options = options.max_retries(max_retries);
            }
            if let Some(delay) = seed.delay {
                let delay = TimeDelta::try_seconds(i64::try_from(delay).unwrap_or(i64::MAX))
                    .unwrap_or(TimeDelta::MAX);
                if let Some(eta) = now.checked_add_signed(delay) {
                    options = options.eta(eta);
                }
            }
            let work = WorkDescriptor::new(SHELL_FUNCTION).arg(seed.cmd.clone());
            nodes.insert(name.clone(), graph.delayable(work, options));
        }

        for (name, seed) in cfg.job.iter() {
            let child = seed_node(&nodes, name)?;
            for dep in seed.after.iter() {
                graph.on_done(seed_node(&nodes, dep)?, &[child])?;
            }
        }

        Ok(Self { graph, nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Seed names grouped by connected graph, each group in topological
    /// order.
    pub fn ordered_names(&self) -> crate::errors::Result<Vec<Vec<String>>> {
        let names: HashMap<NodeId, &str> = self
            .nodes
            .iter()
            .map(|(name, node)| (*node, name.as_str()))
            .collect();
        let mut seen = BTreeSet::new();
        let mut groups = Vec::new();

        for node in self.nodes.values() {
            if seen.contains(node) {
                continue;
            }
            let flat = self.graph.flatten(*node)?;
            flat.check_acyclic()?;
            seen.extend(flat.vertices());
            groups.push(
                flat.topological_sort()
                    .into_iter()
                    .filter_map(|vertex| names.get(&vertex).map(|name| name.to_string()))
                    .collect(),
            );
        }
        Ok(groups)
    }

    /// Delay every connected graph of seeds. Returns the number of jobs
    /// stored.
    pub async fn delay_all(&self, queue: &JobQueue) -> crate::errors::Result<usize> {
        let mut seen = BTreeSet::new();
        let mut stored = 0;
        for node in self.nodes.values() {
            if seen.contains(node) {
                continue;
            }
            seen.extend(self.graph.flatten(*node)?.vertices());
            stored += queue.delay(&self.graph, *node).await?.jobs.len();
        }
        Ok(stored)
    }
}

fn seed_node(nodes: &BTreeMap<String, NodeId>, name: &str) -> crate::errors::Result<NodeId> {
    nodes
        .get(name)
        .copied()
        .ok_or_else(|| QueueError::ConfigError(format!("unknown job '{name}'")))
}

/// Print configuration, channel tree and seeded jobs without running
/// anything.
fn print_dry_run(
    cfg: &ConfigFile,
    registry: &FunctionRegistry,
    manager: &ChannelManager,
    seeds: &SeedGraph,
) -> crate::errors::Result<()> {
    println!("jobqueue dry-run");
    println!("  runner.databases = {:?}", cfg.runner.databases);
    println!("  runner.dispatch = {:?}", cfg.runner.dispatch);
    println!("  runner.select_timeout = {}s", cfg.runner.select_timeout);
    println!("  runner.error_recovery_delay = {}s", cfg.runner.error_recovery_delay);
    println!("  retry.default_interval = {}s", cfg.retry.default_interval);
    println!();

    println!("channels:");
    print!("{manager}");
    println!();

    let mut functions: Vec<&str> = registry.names().collect();
    functions.sort_unstable();
    println!("functions ({}):", functions.len());
    for name in functions {
        println!("  - {name}");
        if let Some(channel) = registry.channel_of(name) {
            println!("      channel: {channel}");
        }
        let policy = registry.retry_policy(name);
        if !policy.pattern.is_empty() {
            println!("      retry_pattern: {:?}", policy.pattern);
        }
    }
    println!();

    println!("jobs ({}):", seeds.len());
    for group in seeds.ordered_names()? {
        for name in group {
            let Some(seed) = cfg.job.get(&name) else {
                continue;
            };
            println!("  - {name}");
            println!("      cmd: {}", seed.cmd);
            if let Some(ref channel) = seed.channel {
                println!("      channel: {channel}");
            }
            if let Some(priority) = seed.priority {
                println!("      priority: {priority}");
            }
            if !seed.after.is_empty() {
                println!("      after: {:?}", seed.after);
            }
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
