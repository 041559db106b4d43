use std::collections::HashMap;
use std::sync::Arc;

use control_plane::{UnitRoute, UnitRule};
use sha2::{Digest, Sha256};

use crate::types::GovernedRequest;

pub const DEFAULT_VARIABLE_PARSER: &str = "default";
pub const HASH_MOD_FUNCTION: &str = "hash_mod";

/// Extracts the routing variable of a unit rule from a request.
pub trait VariableParser: Send + Sync {
    fn name(&self) -> &str;
    fn parse(&self, rule: &UnitRule, request: &dyn GovernedRequest) -> Option<String>;
}

/// Decides whether a variable belongs to a unit route.
pub trait UnitFunction: Send + Sync {
    fn name(&self) -> &str;
    fn contains(&self, rule: &UnitRule, route: &UnitRoute, variable: &str) -> bool;
}

/// Reads the rule's variable sources in order; the first non-empty value wins.
pub struct SourceVariableParser;

impl VariableParser for SourceVariableParser {
    fn name(&self) -> &str {
        DEFAULT_VARIABLE_PARSER
    }

    fn parse(&self, rule: &UnitRule, request: &dyn GovernedRequest) -> Option<String> {
        rule.variable_sources.iter().find_map(|source| {
            request
                .tag_value(source.source, &source.key)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
    }
}

/// Allow-lists and prefixes pin a variable to one route. Other variables are
/// reduced to `value % modulo` and matched against the route ranges; numeric
/// variables are used as is, others are hashed.
pub struct HashModFunction;

impl HashModFunction {
    pub fn value(variable: &str, modulo: u64) -> u64 {
        let modulo = modulo.max(1);
        match variable.parse::<u64>() {
            Ok(value) => value % modulo,
            Err(_) => {
                let digest = Sha256::digest(variable.as_bytes());
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&digest[..8]);
                u64::from_be_bytes(bytes) % modulo
            }
        }
    }
}

impl UnitFunction for HashModFunction {
    fn name(&self) -> &str {
        HASH_MOD_FUNCTION
    }

    fn contains(&self, rule: &UnitRule, route: &UnitRoute, variable: &str) -> bool {
        if let Some(pinned) = rule.units.iter().find(|candidate| candidate.pins(variable)) {
            return pinned.code == route.code;
        }
        let value = Self::value(variable, rule.modulo);
        route.ranges.iter().any(|range| range.contains(value))
    }
}

pub struct FunctionRegistry {
    parsers: HashMap<String, Arc<dyn VariableParser>>,
    functions: HashMap<String, Arc<dyn UnitFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            parsers: HashMap::new(),
            functions: HashMap::new(),
        };
        registry.register_variable_parser(Arc::new(SourceVariableParser));
        registry.register_unit_function(Arc::new(HashModFunction));
        registry
    }

    pub fn register_variable_parser(&mut self, parser: Arc<dyn VariableParser>) {
        self.parsers.insert(parser.name().to_string(), parser);
    }

    pub fn register_unit_function(&mut self, function: Arc<dyn UnitFunction>) {
        self.functions.insert(function.name().to_string(), function);
    }

    pub fn variable_parser(&self, name: &str) -> Option<&Arc<dyn VariableParser>> {
        self.parsers
            .get(name)
            .or_else(|| self.parsers.get(DEFAULT_VARIABLE_PARSER))
    }

    pub fn unit_function(&self, name: &str) -> Option<&Arc<dyn UnitFunction>> {
        self.functions
            .get(name)
            .or_else(|| self.functions.get(HASH_MOD_FUNCTION))
    }

    pub fn parse_variable(&self, rule: &UnitRule, request: &dyn GovernedRequest) -> Option<String> {
        self.variable_parser(&rule.variable_parser)?
            .parse(rule, request)
    }

    pub fn contains(&self, rule: &UnitRule, route: &UnitRoute, variable: &str) -> bool {
        self.unit_function(&rule.variable_function)
            .map(|function| function.contains(rule, route, variable))
            .unwrap_or(false)
    }

    /// The unit route that owns `variable`.
    pub fn unit_route_by_variable<'a>(&self, rule: &'a UnitRule, variable: &str) -> Option<&'a UnitRoute> {
        rule.units
            .iter()
            .find(|route| self.contains(rule, route, variable))
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
