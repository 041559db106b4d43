use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::{Application, Location};
use crate::static_config::{StaticConfigItem, STATIC_CONFIG_TABLE};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    values: HashMap<String, String>,
}

impl SystemConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key)
            .map(str::to_string)
            .or_else(|| default_value(key))
            .unwrap_or_default()
    }

    pub fn get_number(&self, key: &str) -> i64 {
        self.get(key)
            .and_then(|value| value.parse::<i64>().ok())
            .or_else(|| default_value(key).and_then(|value| value.parse::<i64>().ok()))
            .unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .and_then(parse_bool)
            .or_else(|| default_value(key).and_then(|value| parse_bool(&value)))
            .unwrap_or(false)
    }

    pub fn get_optional(&self, key: &str) -> Option<String> {
        let value = self.get_string(key);
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }

    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get_string(key)
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("type mismatch for key {0}: expected {1}")]
    TypeMismatch(String, String),
    #[error("config read error: {0}")]
    Io(String),
}

pub struct SystemConfigLoader;

impl SystemConfigLoader {
    /// Flattens nested tables into `section.key` entries and checks each one
    /// against the static key table.
    pub fn from_str(input: &str) -> Result<SystemConfig, ConfigError> {
        let root: toml::Table = toml::from_str(input).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let mut values = HashMap::new();
        let mut pending: Vec<(String, &toml::Value)> =
            root.iter().map(|(key, value)| (key.clone(), value)).collect();
        while let Some((key, value)) = pending.pop() {
            let (text, value_type) = match value {
                toml::Value::Table(table) => {
                    pending.extend(table.iter().map(|(nested, value)| (format!("{key}.{nested}"), value)));
                    continue;
                }
                toml::Value::String(text) => (text.clone(), "string"),
                toml::Value::Integer(number) => (number.to_string(), "number"),
                toml::Value::Float(number) => (number.to_string(), "number"),
                toml::Value::Boolean(flag) => (flag.to_string(), "boolean"),
                _ => return Err(ConfigError::TypeMismatch(key, "string|number|boolean".to_string())),
            };
            let item = config_item(&key).ok_or_else(|| ConfigError::UnknownKey(key.clone()))?;
            if item.value_type != value_type {
                return Err(ConfigError::TypeMismatch(key, item.value_type.to_string()));
            }
            values.insert(key, text);
        }
        Ok(SystemConfig { values })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<SystemConfig, ConfigError> {
        let input = std::fs::read_to_string(path.as_ref())
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.as_ref().display())))?;
        Self::from_str(&input)
    }
}

/// Typed view of the governance keys.
#[derive(Clone, Debug)]
pub struct GovernanceConfig {
    pub application: Application,
    pub live_enabled: bool,
    pub gateway: bool,
    pub max_failover_hops: u32,
    pub lane_enabled: bool,
    pub flow_control_enabled: bool,
    pub concurrency_limiter: String,
    pub rate_limiter: String,
    pub load_interval: Duration,
    pub initialize_timeout: Duration,
    pub sync_sources: Vec<String>,
    pub event_capacity: usize,
    pub inbound_filters: Vec<String>,
}

impl GovernanceConfig {
    pub fn from_system(config: &SystemConfig) -> Self {
        Self {
            application: Application {
                name: config.get_string("app.name"),
                service: config.get_optional("app.service"),
                location: Location {
                    region: config.get_optional("location.region"),
                    zone: config.get_optional("location.zone"),
                    live_space_id: config.get_optional("location.live_space_id"),
                    unit: config.get_optional("location.unit"),
                    cell: config.get_optional("location.cell"),
                    lane_space_id: config.get_optional("location.lane_space_id"),
                    lane: config.get_optional("location.lane"),
                    ip: config.get_optional("location.ip"),
                },
            },
            live_enabled: config.get_bool("live.enabled"),
            gateway: config.get_bool("live.gateway"),
            max_failover_hops: config.get_number("live.max_failover_hops").max(0) as u32,
            lane_enabled: config.get_bool("lane.enabled"),
            flow_control_enabled: config.get_bool("flow_control.enabled"),
            concurrency_limiter: config.get_string("flow_control.concurrency_limiter"),
            rate_limiter: config.get_string("flow_control.rate_limiter"),
            load_interval: millis(config.get_number("flow_control.load_interval_ms")),
            initialize_timeout: millis(config.get_number("governance.initialize_timeout_ms")),
            sync_sources: config.get_list("governance.sync_sources"),
            event_capacity: config.get_number("event.capacity").max(1) as usize,
            inbound_filters: config.get_list("filter.inbound"),
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.application.location = location;
        self
    }

    pub fn location(&self) -> &Location {
        &self.application.location
    }
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self::from_system(&SystemConfig::default())
    }
}

fn millis(value: i64) -> Duration {
    Duration::from_millis(value.max(0) as u64)
}

fn config_item(key: &str) -> Option<&'static StaticConfigItem> {
    STATIC_CONFIG_TABLE.iter().find(|item| item.key == key)
}

fn default_value(key: &str) -> Option<String> {
    config_item(key).map(|item| item.default_value.to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
