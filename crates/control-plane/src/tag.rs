use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Where a tag value is read from on the request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagSource {
    #[default]
    Header,
    Query,
    Cookie,
    Attribute,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagOpType {
    Equal,
    NotEqual,
    In,
    NotIn,
    Regular,
    Prefix,
}

impl TagOpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagOpType::Equal => "equal",
            TagOpType::NotEqual => "not_equal",
            TagOpType::In => "in",
            TagOpType::NotIn => "not_in",
            TagOpType::Regular => "regular",
            TagOpType::Prefix => "prefix",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TagCondition {
    #[serde(default)]
    pub source: TagSource,
    pub key: String,
    pub op: TagOpType,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(skip)]
    pattern: OnceLock<Option<Regex>>,
}

impl TagCondition {
    pub fn new(source: TagSource, key: impl Into<String>, op: TagOpType, values: Vec<String>) -> Self {
        Self {
            source,
            key: key.into(),
            op,
            values,
            pattern: OnceLock::new(),
        }
    }

    pub fn header(key: impl Into<String>, op: TagOpType, values: &[&str]) -> Self {
        Self::new(
            TagSource::Header,
            key,
            op,
            values.iter().map(|v| v.to_string()).collect(),
        )
    }

    pub fn first_value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }

    /// Compiled once from the first value; an invalid pattern never matches.
    pub fn regex(&self) -> Option<&Regex> {
        self.pattern
            .get_or_init(|| self.first_value().and_then(|value| Regex::new(value).ok()))
            .as_ref()
    }
}
