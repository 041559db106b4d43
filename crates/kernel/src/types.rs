use std::collections::HashMap;

use control_plane::{DegradeConfig, TagSource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fault::{Fault, GovernanceError};

pub const HEADER_LIVE_SPACE_ID: &str = "x-live-space-id";
pub const HEADER_LIVE_RULE_ID: &str = "x-live-rule-id";
pub const HEADER_LIVE_VARIABLE: &str = "x-live-variable";
pub const HEADER_LIVE_UNIT: &str = "x-live-unit";
pub const HEADER_LIVE_CELL: &str = "x-live-cell";
pub const HEADER_LIVE_FAILOVER: &str = "x-live-failover";
pub const HEADER_LIVE_FAILOVER_HOPS: &str = "x-live-failover-hops";
pub const HEADER_LANE_SPACE_ID: &str = "x-lane-space-id";
pub const HEADER_LANE: &str = "x-lane";
pub const HEADER_SERVICE_APPLICATION: &str = "x-service-application";
pub const HEADER_SERVICE_TOKEN: &str = "x-service-token";

/// What the engine needs from a transport request. Adapters for concrete
/// clients and servers implement this; the engine never sees the transport.
pub trait GovernedRequest: Send + Sync {
    fn request_id(&self) -> &str;
    fn service(&self) -> &str;
    fn group(&self) -> Option<&str>;
    fn path(&self) -> &str;
    fn method(&self) -> &str;
    fn host(&self) -> Option<&str>;
    fn header(&self, key: &str) -> Option<&str>;
    fn set_header(&mut self, key: &str, value: String);
    fn query(&self, key: &str) -> Option<&str>;
    fn cookie(&self, key: &str) -> Option<&str>;
    fn attribute(&self, key: &str) -> Option<&str>;
    fn set_attribute(&mut self, key: &str, value: String);
    fn add_attempt(&mut self, endpoint_id: &str);
    fn attempts(&self) -> &[String];

    fn tag_value(&self, source: TagSource, key: &str) -> Option<&str> {
        match source {
            TagSource::Header => self.header(key),
            TagSource::Query => self.query(key),
            TagSource::Cookie => self.cookie(key),
            TagSource::Attribute => self.attribute(key),
        }
    }

    /// Comma separated values are split.
    fn tag_values(&self, source: TagSource, key: &str) -> Vec<String> {
        self.tag_value(source, key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Header first, then attribute.
    fn carrier(&self, key: &str) -> Option<&str> {
        self.header(key)
            .or_else(|| self.attribute(key))
            .filter(|value| !value.is_empty())
    }

    fn reject(&self, fault: Fault) -> GovernanceError {
        GovernanceError::Rejected(fault)
    }

    fn failover(&mut self, fault: &Fault) {
        self.set_attribute(HEADER_LIVE_FAILOVER, fault.reason.clone());
    }

    fn degrade(&self, fault: Fault, config: DegradeConfig) -> GovernanceError {
        GovernanceError::Degraded { fault, config }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default = "new_request_id")]
    pub request_id: String,
    pub service: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub attempts: Vec<String>,
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

impl RequestEnvelope {
    pub fn new(service: impl Into<String>, path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            request_id: new_request_id(),
            service: service.into(),
            path: path.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.insert(key.to_string(), value.into());
        self
    }

    pub fn with_cookie(mut self, key: &str, value: impl Into<String>) -> Self {
        self.cookies.insert(key.to_string(), value.into());
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

impl GovernedRequest for RequestEnvelope {
    fn request_id(&self) -> &str {
        &self.request_id
    }

    fn service(&self) -> &str {
        &self.service
    }

    fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(key)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }

    fn set_header(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_ascii_lowercase(), value);
    }

    fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    fn cookie(&self, key: &str) -> Option<&str> {
        self.cookies.get(key).map(String::as_str)
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    fn set_attribute(&mut self, key: &str, value: String) {
        self.attributes.insert(key.to_string(), value);
    }

    fn add_attempt(&mut self, endpoint_id: &str) {
        self.attempts.push(endpoint_id.to_string());
    }

    fn attempts(&self) -> &[String] {
        &self.attempts
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub live_space_id: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub cell: Option<String>,
    #[serde(default)]
    pub lane_space_id: Option<String>,
    #[serde(default)]
    pub lane: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

fn default_weight() -> u32 {
    100
}

impl Endpoint {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            weight: default_weight(),
            ..Default::default()
        }
    }

    pub fn in_unit(mut self, unit: impl Into<String>, cell: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self.cell = Some(cell.into());
        self
    }

    pub fn in_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
