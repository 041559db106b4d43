use std::collections::HashMap;
use std::sync::Arc;

use control_plane::{TagCondition, TagOpType};

use crate::types::GovernedRequest;

/// Evaluates one condition against the request values read for its key.
pub trait TagMatcher: Send + Sync {
    fn matches(&self, condition: &TagCondition, values: &[String]) -> bool;
}

struct EqualMatcher;

impl TagMatcher for EqualMatcher {
    fn matches(&self, condition: &TagCondition, values: &[String]) -> bool {
        let Some(expected) = condition.first_value() else {
            return false;
        };
        values.iter().any(|value| value == expected)
    }
}

struct NotEqualMatcher;

impl TagMatcher for NotEqualMatcher {
    fn matches(&self, condition: &TagCondition, values: &[String]) -> bool {
        !EqualMatcher.matches(condition, values)
    }
}

struct InMatcher;

impl TagMatcher for InMatcher {
    fn matches(&self, condition: &TagCondition, values: &[String]) -> bool {
        values.iter().any(|value| condition.values.contains(value))
    }
}

struct NotInMatcher;

impl TagMatcher for NotInMatcher {
    fn matches(&self, condition: &TagCondition, values: &[String]) -> bool {
        !InMatcher.matches(condition, values)
    }
}

struct RegularMatcher;

impl TagMatcher for RegularMatcher {
    fn matches(&self, condition: &TagCondition, values: &[String]) -> bool {
        match condition.regex() {
            Some(regex) => values.iter().any(|value| regex.is_match(value)),
            None => false,
        }
    }
}

struct PrefixMatcher;

impl TagMatcher for PrefixMatcher {
    fn matches(&self, condition: &TagCondition, values: &[String]) -> bool {
        values.iter().any(|value| {
            condition
                .values
                .iter()
                .any(|prefix| !prefix.is_empty() && value.starts_with(prefix.as_str()))
        })
    }
}

pub struct TagMatcherRegistry {
    matchers: HashMap<TagOpType, Arc<dyn TagMatcher>>,
}

impl TagMatcherRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            matchers: HashMap::new(),
        };
        registry.register(TagOpType::Equal, Arc::new(EqualMatcher));
        registry.register(TagOpType::NotEqual, Arc::new(NotEqualMatcher));
        registry.register(TagOpType::In, Arc::new(InMatcher));
        registry.register(TagOpType::NotIn, Arc::new(NotInMatcher));
        registry.register(TagOpType::Regular, Arc::new(RegularMatcher));
        registry.register(TagOpType::Prefix, Arc::new(PrefixMatcher));
        registry
    }

    pub fn register(&mut self, op: TagOpType, matcher: Arc<dyn TagMatcher>) {
        self.matchers.insert(op, matcher);
    }

    pub fn matches(&self, condition: &TagCondition, request: &dyn GovernedRequest) -> bool {
        let Some(matcher) = self.matchers.get(&condition.op) else {
            return false;
        };
        let values = request.tag_values(condition.source, &condition.key);
        matcher.matches(condition, &values)
    }

    /// True when every condition matches; no conditions always match.
    pub fn matches_all(&self, conditions: &[TagCondition], request: &dyn GovernedRequest) -> bool {
        conditions
            .iter()
            .all(|condition| self.matches(condition, request))
    }
}

impl Default for TagMatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}
