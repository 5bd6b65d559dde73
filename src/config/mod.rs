// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a config file, env overrides.
//! - `validate.rs`: `RawConfigFile` -> `ConfigFile`.
//! - `channels.rs`: the channel topology string.

pub mod channels;
pub mod loader;
pub mod model;
pub mod validate;

pub use channels::{parse_simple_config, ChannelConfig};
pub use loader::{default_config_path, load_and_validate, load_from_path, load_with_channels};
pub use model::{ConfigFile, FunctionSection, JobSeed, RawConfigFile, RetrySection, RunnerSection};
