use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::memo::Memo;
use crate::tag::TagCondition;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Lane {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub default_lane: bool,
}

impl Lane {
    pub fn new(code: impl Into<String>, default_lane: bool) -> Self {
        Self {
            code: code.into(),
            name: String::new(),
            default_lane,
        }
    }
}

/// Sends matching traffic to `lane`; rules are tried by ascending `order`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaneRule {
    pub id: String,
    pub lane: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub conditions: Vec<TagCondition>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LaneSpace {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub lanes: Vec<Lane>,
    #[serde(default)]
    pub rules: Vec<LaneRule>,
    #[serde(skip)]
    index: Memo<HashMap<String, usize>>,
}

impl LaneSpace {
    pub fn new(id: impl Into<String>, lanes: Vec<Lane>, rules: Vec<LaneRule>) -> Self {
        Self {
            id: id.into(),
            lanes,
            rules,
            ..Default::default()
        }
    }

    pub fn lane(&self, code: &str) -> Option<&Lane> {
        let index = self.index.get_or_init(|| {
            self.lanes
                .iter()
                .enumerate()
                .map(|(pos, lane)| (lane.code.clone(), pos))
                .collect()
        });
        index.get(code).and_then(|pos| self.lanes.get(*pos))
    }

    pub fn default_lane(&self) -> Option<&Lane> {
        self.lanes.iter().find(|lane| lane.default_lane)
    }

    pub fn ordered_rules(&self) -> Vec<&LaneRule> {
        let mut rules: Vec<&LaneRule> = self.rules.iter().collect();
        rules.sort_by_key(|rule| rule.order);
        rules
    }
}
