use std::time::Duration;

use control_plane::{ConfigError, GovernanceConfig, SystemConfigLoader};

#[test]
fn config_loader_accepts_valid_keys() {
    let input = r#"
[app]
name = "order-web"
service = "order"
[location]
live_space_id = "space-1"
unit = "u1"
cell = "c1"
[live]
enabled = true
max_failover_hops = 2
[flow_control]
load_interval_ms = 250
"#;
    let config = SystemConfigLoader::from_str(input).expect("config");
    assert_eq!(config.get_string("app.name"), "order-web");
    assert_eq!(config.get_number("live.max_failover_hops"), 2);
    assert!(config.get_bool("live.enabled"));
}

#[test]
fn config_loader_rejects_unknown_key() {
    let input = r#"
unknown = { value = "x" }
"#;
    let err = SystemConfigLoader::from_str(input).expect_err("error");
    match err {
        ConfigError::UnknownKey(key) => assert_eq!(key, "unknown.value"),
        _ => panic!("expected unknown key error"),
    }
}

#[test]
fn config_loader_rejects_type_mismatch() {
    let input = r#"
live = { max_failover_hops = "x" }
"#;
    let err = SystemConfigLoader::from_str(input).expect_err("error");
    match err {
        ConfigError::TypeMismatch(key, _) => assert_eq!(key, "live.max_failover_hops"),
        _ => panic!("expected type mismatch"),
    }
}

#[test]
fn config_loader_rejects_malformed_toml() {
    let err = SystemConfigLoader::from_str("app = {").expect_err("error");
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn governance_config_uses_table_defaults() {
    let config = GovernanceConfig::default();
    assert!(config.live_enabled);
    assert!(!config.gateway);
    assert_eq!(config.max_failover_hops, 1);
    assert!(!config.lane_enabled);
    assert!(config.flow_control_enabled);
    assert_eq!(config.concurrency_limiter, "semaphore");
    assert_eq!(config.rate_limiter, "fixed_window");
    assert_eq!(config.load_interval, Duration::from_millis(1000));
    assert_eq!(config.initialize_timeout, Duration::from_millis(10_000));
    assert_eq!(config.event_capacity, 1024);
    assert!(config.sync_sources.is_empty());
    assert!(config.inbound_filters.is_empty());
    assert_eq!(config.location().unit, None);
}

#[test]
fn governance_config_reads_location_and_lists() {
    let input = r#"
app = { name = "order-web" }
location = { live_space_id = "space-1", unit = "u1", cell = "" }
governance = { sync_sources = "policy, lane ,", initialize_timeout_ms = 50 }
filter = { inbound = "auth,unit,failover" }
"#;
    let system = SystemConfigLoader::from_str(input).expect("config");
    let config = GovernanceConfig::from_system(&system);
    assert_eq!(config.application.name, "order-web");
    assert_eq!(config.location().live_space_id.as_deref(), Some("space-1"));
    assert_eq!(config.location().unit.as_deref(), Some("u1"));
    assert_eq!(config.location().cell, None);
    assert_eq!(config.sync_sources, vec!["policy".to_string(), "lane".to_string()]);
    assert_eq!(config.initialize_timeout, Duration::from_millis(50));
    assert_eq!(config.inbound_filters.len(), 3);
}
