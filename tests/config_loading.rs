// tests/config_loading.rs

use std::io::Write;

use jobqueue::config::{load_from_path, load_with_channels, ConfigFile};
use jobqueue::errors::QueueError;
use jobqueue::exec::SHELL_FUNCTION;
use jobqueue::job::RetryDelay;
use jobqueue::types::DispatchMode;
use jobqueue::{build_channel_manager, build_registry, SeedGraph};
use jobqueue_test_utils::builders::{ConfigFileBuilder, JobSeedBuilder};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn load(contents: &str) -> Result<ConfigFile, QueueError> {
    let file = write_config(contents);
    load_with_channels(file.path(), None)
}

#[test]
fn full_config_loads() {
    let cfg = load(
        r#"
[runner]
channels = "root:4,root.shell:2"
databases = ["main", "archive"]
select_timeout = 30
dispatch = "http"
port = 8080

[retry]
default_interval = 120

[function."shell.run"]
channel = "root.shell"
retry_pattern = { "1" = 10, "5" = [60, 120] }

[job.fetch]
cmd = "echo fetch"

[job.build]
cmd = "echo build"
after = ["fetch"]
priority = 5
"#,
    )
    .unwrap();

    assert_eq!(cfg.runner.databases, vec!["main", "archive"]);
    assert_eq!(cfg.runner.dispatch, DispatchMode::Http);
    assert_eq!(cfg.runner.http_target().port, 8080);
    assert_eq!(cfg.runner.select_timeout().as_secs(), 30);
    assert_eq!(cfg.channels.len(), 2);
    assert_eq!(cfg.job["build"].after, vec!["fetch"]);

    let policy = cfg.retry_policy(SHELL_FUNCTION).unwrap();
    assert_eq!(policy.delay_for(0), RetryDelay::Fixed(120));
    assert_eq!(policy.delay_for(6), RetryDelay::Range(60, 120));
    assert!(cfg.retry_policy("other").is_none());
}

#[test]
fn empty_file_uses_defaults() {
    let cfg = load("").unwrap();

    assert_eq!(cfg.runner.databases, vec!["main"]);
    assert_eq!(cfg.runner.dispatch, DispatchMode::Local);
    assert_eq!(cfg.runner.select_timeout().as_secs(), 60);
    assert!(cfg.channels.is_empty());
    assert!(cfg.job.is_empty());
}

#[test]
fn channels_override_replaces_the_file_value() {
    let file = write_config("[runner]\nchannels = \"root:1\"\n");

    let cfg = load_with_channels(file.path(), Some("root:3,root.a:1".to_string())).unwrap();
    assert_eq!(cfg.channels.len(), 2);

    let blank = load_with_channels(file.path(), Some("  ".to_string())).unwrap();
    assert_eq!(blank.channels.len(), 1);
}

#[test]
fn invalid_channel_string_is_rejected() {
    let err = load("[runner]\nchannels = \"root:4,root.a:x\"\n").unwrap_err();
    assert!(matches!(err, QueueError::ConfigError(msg) if msg.contains("root.a:x")));
}

#[test]
fn seed_cycle_is_rejected() {
    let err = load(
        r#"
[job.a]
cmd = "true"
after = ["b"]

[job.b]
cmd = "true"
after = ["a"]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, QueueError::DagCycle(_)));
}

#[test]
fn unknown_or_self_dependency_is_rejected() {
    let unknown = load("[job.a]\ncmd = \"true\"\nafter = [\"missing\"]\n").unwrap_err();
    assert!(matches!(unknown, QueueError::ConfigError(msg) if msg.contains("unknown dependency 'missing'")));

    let itself = load("[job.a]\ncmd = \"true\"\nafter = [\"a\"]\n").unwrap_err();
    assert!(matches!(itself, QueueError::ConfigError(msg) if msg.contains("itself")));
}

#[test]
fn runner_settings_are_checked() {
    assert!(matches!(
        load("[runner]\ndatabases = []\n"),
        Err(QueueError::ConfigError(_))
    ));
    assert!(matches!(
        load("[runner]\nselect_timeout = 0\n"),
        Err(QueueError::ConfigError(_))
    ));
    assert!(matches!(
        load("[runner]\ndispatch_timeout = 0.0\n"),
        Err(QueueError::ConfigError(_))
    ));
}

#[test]
fn retry_pattern_keys_must_be_counts() {
    let err = load("[function.\"shell.run\"]\nretry_pattern = { \"often\" = 10 }\n").unwrap_err();
    assert!(matches!(err, QueueError::ConfigError(msg) if msg.contains("often")));
}

#[test]
fn unknown_fields_are_rejected() {
    let file = write_config("[runner]\nworkers = 4\n");
    assert!(matches!(load_from_path(file.path()), Err(QueueError::TomlError(_))));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_with_channels(dir.path().join("nope.toml"), None).unwrap_err();
    assert!(matches!(err, QueueError::IoError(_)));
}

#[test]
fn registry_applies_function_overrides() {
    let cfg = load(
        r#"
[function."shell.run"]
channel = "root.shell"

[function."not.registered"]
channel = "root.other"
"#,
    )
    .unwrap();

    let registry = build_registry(&cfg);
    assert_eq!(registry.channel_of(SHELL_FUNCTION), Some("root.shell"));
    assert!(registry.get("not.registered").is_none());
}

#[test]
fn channel_manager_follows_the_config() {
    let cfg = ConfigFileBuilder::new()
        .with_channels("root:4,root.shell:2:sequential")
        .build();

    let manager = build_channel_manager(&cfg).unwrap();
    let shell = manager.channel_by_name("root.shell").unwrap();
    assert_eq!(shell.capacity, Some(2));
    assert!(shell.sequential);
}

#[test]
fn seeds_are_grouped_and_ordered() {
    let cfg = ConfigFileBuilder::new()
        .with_job("test", JobSeedBuilder::new("true").after(&["build"]).build())
        .with_job("build", JobSeedBuilder::new("true").after(&["fetch"]).build())
        .with_job("fetch", JobSeedBuilder::new("true").build())
        .with_job("lint", JobSeedBuilder::new("true").channel("root.lint").build())
        .build();

    let seeds = SeedGraph::from_config(&cfg).unwrap();

    assert_eq!(seeds.len(), 4);
    assert_eq!(
        seeds.ordered_names().unwrap(),
        vec![vec!["fetch", "build", "test"], vec!["lint"]]
    );
}
