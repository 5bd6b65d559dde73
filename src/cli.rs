// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::default_config_path;

/// Command-line arguments for `jobqueue`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobqueue",
    version,
    about = "Run queued jobs through capacity-limited channels.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Channel topology, e.g. `root:4,root.exports:2:throttle=5`.
    ///
    /// Overrides `JOBQUEUE_CHANNELS` and `[runner].channels`.
    #[arg(long, value_name = "STRING")]
    pub channels: Option<String>,

    /// Exit when nothing is left to run instead of serving forever.
    #[arg(long)]
    pub once: bool,

    /// Overrides `JOBQUEUE_LOG`.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print channels and seeded jobs, but run nothing.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
