// tests/channel_config.rs

use jobqueue::config::{parse_simple_config, ChannelConfig};
use jobqueue::errors::QueueError;

fn config_error(input: &str) -> String {
    match parse_simple_config(input) {
        Err(QueueError::ConfigError(msg)) => msg,
        Err(e) => panic!("Expected ConfigError for {input:?}, got: {e:?}"),
        Ok(cfg) => panic!("Expected error for {input:?}, got: {cfg:?}"),
    }
}

#[test]
fn parses_names_capacities_and_options() {
    let configs =
        parse_simple_config("root:4,root.exports:2:throttle=5\n exports.urgent:1:sequential ,misc")
            .unwrap();

    assert_eq!(
        configs,
        vec![
            ChannelConfig::new("root", Some(4)),
            ChannelConfig {
                throttle: 5,
                ..ChannelConfig::new("root.exports", Some(2))
            },
            ChannelConfig {
                sequential: true,
                ..ChannelConfig::new("exports.urgent", Some(1))
            },
            ChannelConfig::new("misc", Some(1)),
        ]
    );
}

#[test]
fn empty_entries_are_skipped() {
    assert!(parse_simple_config("").unwrap().is_empty());
    assert_eq!(parse_simple_config(",,root:2,\n\n").unwrap().len(), 1);
}

#[test]
fn zero_capacity_is_kept_as_unbounded_marker() {
    let configs = parse_simple_config("root.bulk:0").unwrap();
    assert_eq!(configs[0].capacity, Some(0));
}

#[test]
fn flag_values_accept_common_spellings() {
    for value in ["true", "1", "yes", "TRUE"] {
        let configs = parse_simple_config(&format!("s:1:sequential={value}")).unwrap();
        assert!(configs[0].sequential, "{value} should enable sequential");
    }
    for value in ["false", "0", "no"] {
        let configs = parse_simple_config(&format!("s:1:sequential={value}")).unwrap();
        assert!(!configs[0].sequential, "{value} should disable sequential");
    }
}

#[test]
fn rejects_malformed_entries() {
    assert!(config_error(":4").contains("missing channel name"));
    assert!(config_error("root:four").contains("invalid capacity 'four'"));
    assert!(config_error("root:4:colour=blue").contains("unknown key 'colour'"));
    assert!(config_error("root:4:throttle=1:throttle=2").contains("duplicate key 'throttle'"));
    assert!(config_error("root:4:throttle=soon").contains("invalid throttle 'soon'"));
    assert!(config_error("root:1:sequential=maybe").contains("invalid value 'maybe'"));
    assert!(config_error("root:1:a=b=c").contains("incorrect config item"));
    assert!(config_error("bad name:1").contains("invalid channel name"));
}

#[test]
fn error_message_names_the_offending_entry() {
    let msg = config_error("root:4,exports:x");
    assert_eq!(
        msg,
        "invalid channel config exports:x: invalid capacity 'x'"
    );
}
