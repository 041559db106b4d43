use std::collections::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::memo::Memo;
use crate::tag::TagSource;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    #[default]
    ReadWrite,
    Read,
    None,
}

impl AccessMode {
    pub fn readable(self) -> bool {
        !matches!(self, AccessMode::None)
    }

    pub fn writeable(self) -> bool {
        matches!(self, AccessMode::ReadWrite)
    }

    /// The write-pinning rule: READ places only serve calls that do not write,
    /// NONE places serve nothing.
    pub fn accessible(self, write: bool) -> bool {
        match self {
            AccessMode::ReadWrite => true,
            AccessMode::Read => !write,
            AccessMode::None => false,
        }
    }
}

/// Anything traffic can be placed on: a unit, a cell or a database cluster.
pub trait Place {
    fn code(&self) -> &str;
    fn access_mode(&self) -> AccessMode;

    fn accessible(&self, write: bool) -> bool {
        self.access_mode().accessible(write)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitType {
    Center,
    #[default]
    Normal,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Cell {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub access_mode: AccessMode,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Cell {
    pub fn new(code: impl Into<String>, access_mode: AccessMode) -> Self {
        Self {
            code: code.into(),
            access_mode,
            ..Default::default()
        }
    }
}

impl Place for Cell {
    fn code(&self) -> &str {
        &self.code
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Unit {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit_type: UnitType,
    #[serde(default)]
    pub access_mode: AccessMode,
    #[serde(default)]
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Unit {
    pub fn new(code: impl Into<String>, unit_type: UnitType, access_mode: AccessMode) -> Self {
        Self {
            code: code.into(),
            unit_type,
            access_mode,
            ..Default::default()
        }
    }

    pub fn with_cells(mut self, cells: Vec<Cell>) -> Self {
        self.cells = cells;
        self
    }

    pub fn is_center(&self) -> bool {
        self.unit_type == UnitType::Center
    }

    pub fn cell(&self, code: &str) -> Option<&Cell> {
        self.cells.iter().find(|cell| cell.code == code)
    }
}

impl Place for Unit {
    fn code(&self) -> &str {
        &self.code
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }
}

/// Inclusive range over `hash(variable) % modulo`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UnitRange {
    pub from: u64,
    pub to: u64,
}

impl UnitRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.from && value <= self.to
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CellRoute {
    pub code: String,
    #[serde(default)]
    pub access_mode: AccessMode,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub allows: HashSet<String>,
    #[serde(default)]
    pub prefixes: Vec<String>,
}

/// A variable is pinned by an exact allow entry or a non-empty prefix.
fn pinned(allows: &HashSet<String>, prefixes: &[String], variable: &str) -> bool {
    allows.contains(variable)
        || prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && variable.starts_with(prefix.as_str()))
}

fn default_weight() -> u32 {
    100
}

impl CellRoute {
    pub fn new(code: impl Into<String>, access_mode: AccessMode) -> Self {
        Self {
            code: code.into(),
            access_mode,
            weight: default_weight(),
            ..Default::default()
        }
    }

    pub fn allow(mut self, variable: impl Into<String>) -> Self {
        self.allows.insert(variable.into());
        self
    }

    /// True when the variable is explicitly pinned to this cell.
    pub fn pins(&self, variable: &str) -> bool {
        pinned(&self.allows, &self.prefixes, variable)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UnitRoute {
    pub code: String,
    #[serde(default)]
    pub ranges: Vec<UnitRange>,
    #[serde(default)]
    pub allows: HashSet<String>,
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub cells: Vec<CellRoute>,
}

impl UnitRoute {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn with_range(mut self, from: u64, to: u64) -> Self {
        self.ranges.push(UnitRange::new(from, to));
        self
    }

    pub fn allow(mut self, variable: impl Into<String>) -> Self {
        self.allows.insert(variable.into());
        self
    }

    pub fn with_cells(mut self, cells: Vec<CellRoute>) -> Self {
        self.cells = cells;
        self
    }

    pub fn pins(&self, variable: &str) -> bool {
        pinned(&self.allows, &self.prefixes, variable)
    }

    pub fn cell_route(&self, code: &str) -> Option<&CellRoute> {
        self.cells.iter().find(|route| route.code == code)
    }

    pub fn cell_route_by_variable(&self, variable: &str) -> Option<&CellRoute> {
        self.cells.iter().find(|route| route.pins(variable))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableMissingAction {
    #[default]
    Center,
    Reject,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VariableSource {
    #[serde(default)]
    pub source: TagSource,
    pub key: String,
}

impl VariableSource {
    pub fn header(key: impl Into<String>) -> Self {
        Self {
            source: TagSource::Header,
            key: key.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_modulo")]
    pub modulo: u64,
    #[serde(default = "default_variable_parser")]
    pub variable_parser: String,
    #[serde(default = "default_variable_function")]
    pub variable_function: String,
    #[serde(default)]
    pub variable_sources: Vec<VariableSource>,
    #[serde(default)]
    pub variable_missing_action: VariableMissingAction,
    #[serde(default)]
    pub units: Vec<UnitRoute>,
    #[serde(skip)]
    index: Memo<HashMap<String, usize>>,
}

fn default_modulo() -> u64 {
    10_000
}

fn default_variable_parser() -> String {
    "default".to_string()
}

fn default_variable_function() -> String {
    "hash_mod".to_string()
}

impl UnitRule {
    pub fn new(id: impl Into<String>, units: Vec<UnitRoute>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            modulo: default_modulo(),
            variable_parser: default_variable_parser(),
            variable_function: default_variable_function(),
            variable_sources: Vec::new(),
            variable_missing_action: VariableMissingAction::default(),
            units,
            index: Memo::new(),
        }
    }

    pub fn with_modulo(mut self, modulo: u64) -> Self {
        self.modulo = modulo;
        self
    }

    pub fn with_variable_source(mut self, source: VariableSource) -> Self {
        self.variable_sources.push(source);
        self
    }

    pub fn with_missing_action(mut self, action: VariableMissingAction) -> Self {
        self.variable_missing_action = action;
        self
    }

    pub fn unit_route(&self, code: &str) -> Option<&UnitRoute> {
        let index = self.index.get_or_init(|| {
            self.units
                .iter()
                .enumerate()
                .map(|(pos, route)| (route.code.clone(), pos))
                .collect()
        });
        index.get(code).and_then(|pos| self.units.get(*pos))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LivePath {
    pub path: String,
    #[serde(default)]
    pub rule_id: Option<String>,
}

/// Host-level routing overrides used by HTTP gateways.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LiveDomain {
    pub host: String,
    #[serde(default)]
    pub paths: Vec<LivePath>,
}

impl LiveDomain {
    /// Longest matching path prefix wins.
    pub fn path(&self, path: &str) -> Option<&LivePath> {
        self.paths
            .iter()
            .filter(|candidate| path_matches(&candidate.path, path))
            .max_by_key(|candidate| candidate.path.len())
    }
}

pub(crate) fn path_matches(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() || prefix == "/" {
        return true;
    }
    if !path.starts_with(prefix) {
        return false;
    }
    path.len() == prefix.len()
        || prefix.ends_with('/')
        || path.as_bytes().get(prefix.len()) == Some(&b'/')
}

#[derive(Clone, Debug, Default)]
struct SpaceIndex {
    units: HashMap<String, usize>,
    rules: HashMap<String, usize>,
    center: Option<usize>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LiveSpace {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(default)]
    pub unit_rules: Vec<UnitRule>,
    #[serde(default)]
    pub domains: Vec<LiveDomain>,
    #[serde(skip)]
    index: Memo<SpaceIndex>,
}

impl LiveSpace {
    pub fn new(id: impl Into<String>, units: Vec<Unit>, unit_rules: Vec<UnitRule>) -> Self {
        Self {
            id: id.into(),
            units,
            unit_rules,
            ..Default::default()
        }
    }

    pub fn with_domains(mut self, domains: Vec<LiveDomain>) -> Self {
        self.domains = domains;
        self
    }

    fn index(&self) -> &SpaceIndex {
        self.index.get_or_init(|| SpaceIndex {
            units: self
                .units
                .iter()
                .enumerate()
                .map(|(pos, unit)| (unit.code.clone(), pos))
                .collect(),
            rules: self
                .unit_rules
                .iter()
                .enumerate()
                .map(|(pos, rule)| (rule.id.clone(), pos))
                .collect(),
            center: self.units.iter().position(Unit::is_center),
        })
    }

    pub fn unit(&self, code: &str) -> Option<&Unit> {
        self.index()
            .units
            .get(code)
            .and_then(|pos| self.units.get(*pos))
    }

    pub fn unit_rule(&self, id: &str) -> Option<&UnitRule> {
        self.index()
            .rules
            .get(id)
            .and_then(|pos| self.unit_rules.get(*pos))
    }

    /// The first CENTER unit; uniqueness is the publisher's responsibility.
    pub fn center(&self) -> Option<&Unit> {
        self.index().center.and_then(|pos| self.units.get(pos))
    }

    pub fn single_unit(&self) -> Option<&Unit> {
        match self.units.as_slice() {
            [unit] => Some(unit),
            _ => None,
        }
    }

    pub fn domain(&self, host: &str) -> Option<&LiveDomain> {
        self.domains.iter().find(|domain| domain.host == host)
    }
}
