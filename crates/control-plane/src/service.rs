use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::memo::Memo;
use crate::space::path_matches;
use crate::tag::TagCondition;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    #[default]
    Http,
    Rpc,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitPolicy {
    None,
    Center,
    PreferLocalUnit,
    #[default]
    Rule,
}

impl UnitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitPolicy::None => "NONE",
            UnitPolicy::Center => "CENTER",
            UnitPolicy::PreferLocalUnit => "PREFER_LOCAL_UNIT",
            UnitPolicy::Rule => "RULE",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServiceLivePolicy {
    #[serde(default)]
    pub unit_policy: Option<UnitPolicy>,
    #[serde(default)]
    pub write_protect: Option<bool>,
    #[serde(default)]
    pub unit_rule_id: Option<String>,
}

impl ServiceLivePolicy {
    fn supplement(&mut self, parent: &ServiceLivePolicy) {
        if self.unit_policy.is_none() {
            self.unit_policy = parent.unit_policy;
        }
        if self.write_protect.is_none() {
            self.write_protect = parent.write_protect;
        }
        if self.unit_rule_id.is_none() {
            self.unit_rule_id = parent.unit_rule_id.clone();
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthPolicy {
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// When non-empty only these callers are admitted.
    #[serde(default)]
    pub allow_apps: HashSet<String>,
    #[serde(default)]
    pub deny_apps: HashSet<String>,
}

impl AuthPolicy {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Caller black and white list check.
    pub fn admits(&self, application: Option<&str>) -> bool {
        match application {
            Some(app) => {
                !self.deny_apps.contains(app)
                    && (self.allow_apps.is_empty() || self.allow_apps.contains(app))
            }
            None => self.allow_apps.is_empty(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionKind {
    #[default]
    Allow,
    Deny,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermissionPolicy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: PermissionKind,
    #[serde(default)]
    pub conditions: Vec<TagCondition>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConcurrencyLimitPolicy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub limiter_type: Option<String>,
    pub max_concurrency: u32,
    #[serde(default)]
    pub conditions: Vec<TagCondition>,
}

impl ConcurrencyLimitPolicy {
    pub fn new(id: impl Into<String>, max_concurrency: u32) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            version: 0,
            limiter_type: None,
            max_concurrency,
            conditions: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub limiter_type: Option<String>,
    pub permits: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default)]
    pub conditions: Vec<TagCondition>,
}

fn default_window_ms() -> u64 {
    1_000
}

impl RateLimitPolicy {
    pub fn new(id: impl Into<String>, permits: u32, window_ms: u64) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            version: 0,
            limiter_type: None,
            permits,
            window_ms,
            conditions: Vec::new(),
        }
    }
}

/// One step of the CPU shedding curve: at or above `cpu_usage` percent,
/// reject `ratio` percent of calls.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LoadRatio {
    pub cpu_usage: f64,
    pub ratio: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoadLimitPolicy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cpu_usage: Option<f64>,
    #[serde(default)]
    pub load_average: Option<f64>,
    #[serde(default)]
    pub ratios: Vec<LoadRatio>,
    #[serde(default)]
    pub conditions: Vec<TagCondition>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DegradeConfig {
    #[serde(default = "default_degrade_status")]
    pub status: u16,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub body: String,
}

fn default_degrade_status() -> u16 {
    200
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitBreakPolicy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_duration_ms")]
    pub open_duration_ms: u64,
    #[serde(default = "default_half_open_success_threshold")]
    pub half_open_success_threshold: u32,
    #[serde(default)]
    pub degrade: Option<DegradeConfig>,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_open_duration_ms() -> u64 {
    30_000
}

fn default_half_open_success_threshold() -> u32 {
    2
}

impl CircuitBreakPolicy {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            failure_threshold: default_failure_threshold(),
            open_duration_ms: default_open_duration_ms(),
            half_open_success_threshold: default_half_open_success_threshold(),
            degrade: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct FailoverPolicy {
    #[serde(default)]
    pub retries: u32,
}

/// Governance settings attached to any level of the service tree. Unset
/// fields are inherited from the enclosing level.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServicePolicy {
    #[serde(default)]
    pub live: Option<ServiceLivePolicy>,
    #[serde(default)]
    pub auth: Option<AuthPolicy>,
    #[serde(default)]
    pub permissions: Option<Vec<PermissionPolicy>>,
    #[serde(default)]
    pub concurrency_limits: Option<Vec<ConcurrencyLimitPolicy>>,
    #[serde(default)]
    pub rate_limits: Option<Vec<RateLimitPolicy>>,
    #[serde(default)]
    pub load_limits: Option<Vec<LoadLimitPolicy>>,
    #[serde(default)]
    pub circuit_breaks: Option<Vec<CircuitBreakPolicy>>,
    #[serde(default)]
    pub failover: Option<FailoverPolicy>,
    #[serde(default)]
    pub load_balance: Option<String>,
}

impl ServicePolicy {
    pub fn with_live(unit_policy: UnitPolicy, write_protect: bool) -> Self {
        Self {
            live: Some(ServiceLivePolicy {
                unit_policy: Some(unit_policy),
                write_protect: Some(write_protect),
                unit_rule_id: None,
            }),
            ..Default::default()
        }
    }

    pub fn supplement(&mut self, parent: &ServicePolicy) {
        match (&mut self.live, &parent.live) {
            (Some(live), Some(inherited)) => live.supplement(inherited),
            (None, Some(inherited)) => self.live = Some(inherited.clone()),
            _ => {}
        }
        if self.auth.is_none() {
            self.auth = parent.auth.clone();
        }
        if self.permissions.is_none() {
            self.permissions = parent.permissions.clone();
        }
        if self.concurrency_limits.is_none() {
            self.concurrency_limits = parent.concurrency_limits.clone();
        }
        if self.rate_limits.is_none() {
            self.rate_limits = parent.rate_limits.clone();
        }
        if self.load_limits.is_none() {
            self.load_limits = parent.load_limits.clone();
        }
        if self.circuit_breaks.is_none() {
            self.circuit_breaks = parent.circuit_breaks.clone();
        }
        if self.failover.is_none() {
            self.failover = parent.failover;
        }
        if self.load_balance.is_none() {
            self.load_balance = parent.load_balance.clone();
        }
    }

    pub fn unit_policy(&self) -> UnitPolicy {
        self.live
            .as_ref()
            .and_then(|live| live.unit_policy)
            .unwrap_or_default()
    }

    pub fn write_protect(&self) -> bool {
        self.live
            .as_ref()
            .and_then(|live| live.write_protect)
            .unwrap_or(false)
    }

    pub fn unit_rule_id(&self) -> Option<&str> {
        self.live.as_ref().and_then(|live| live.unit_rule_id.as_deref())
    }

    pub fn permissions(&self) -> &[PermissionPolicy] {
        self.permissions.as_deref().unwrap_or_default()
    }

    pub fn concurrency_limits(&self) -> &[ConcurrencyLimitPolicy] {
        self.concurrency_limits.as_deref().unwrap_or_default()
    }

    pub fn rate_limits(&self) -> &[RateLimitPolicy] {
        self.rate_limits.as_deref().unwrap_or_default()
    }

    pub fn load_limits(&self) -> &[LoadLimitPolicy] {
        self.load_limits.as_deref().unwrap_or_default()
    }

    pub fn circuit_breaks(&self) -> &[CircuitBreakPolicy] {
        self.circuit_breaks.as_deref().unwrap_or_default()
    }

    pub fn retries(&self) -> u32 {
        self.failover.map(|failover| failover.retries).unwrap_or(0)
    }
}

fn effective(own: Option<&ServicePolicy>, parent: &ServicePolicy) -> Arc<ServicePolicy> {
    let mut policy = own.cloned().unwrap_or_default();
    policy.supplement(parent);
    Arc::new(policy)
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServiceMethod {
    pub name: String,
    #[serde(default)]
    pub policy: Option<ServicePolicy>,
    #[serde(default)]
    pub owners: BTreeSet<String>,
    #[serde(skip)]
    effective: Memo<Arc<ServicePolicy>>,
}

impl ServiceMethod {
    pub fn new(name: impl Into<String>, policy: Option<ServicePolicy>) -> Self {
        Self {
            name: name.into(),
            policy,
            ..Default::default()
        }
    }

    pub fn effective_policy(&self, parent: &ServicePolicy) -> Arc<ServicePolicy> {
        self.effective
            .get_or_init(|| effective(self.policy.as_ref(), parent))
            .clone()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServicePath {
    pub path: String,
    #[serde(default)]
    pub methods: Vec<ServiceMethod>,
    #[serde(default)]
    pub policy: Option<ServicePolicy>,
    #[serde(default)]
    pub owners: BTreeSet<String>,
    #[serde(skip)]
    effective: Memo<Arc<ServicePolicy>>,
}

impl ServicePath {
    pub fn new(path: impl Into<String>, policy: Option<ServicePolicy>) -> Self {
        Self {
            path: path.into(),
            policy,
            ..Default::default()
        }
    }

    pub fn with_methods(mut self, methods: Vec<ServiceMethod>) -> Self {
        self.methods = methods;
        self
    }

    pub fn method(&self, name: &str) -> Option<&ServiceMethod> {
        self.methods
            .iter()
            .find(|method| method.name.eq_ignore_ascii_case(name))
    }

    pub fn effective_policy(&self, parent: &ServicePolicy) -> Arc<ServicePolicy> {
        self.effective
            .get_or_init(|| effective(self.policy.as_ref(), parent))
            .clone()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub name: String,
    #[serde(default)]
    pub default_group: bool,
    #[serde(default)]
    pub paths: Vec<ServicePath>,
    #[serde(default)]
    pub policy: Option<ServicePolicy>,
    #[serde(default)]
    pub owners: BTreeSet<String>,
    #[serde(skip)]
    effective: Memo<Arc<ServicePolicy>>,
}

impl ServiceGroup {
    pub fn new(name: impl Into<String>, policy: Option<ServicePolicy>) -> Self {
        Self {
            name: name.into(),
            policy,
            ..Default::default()
        }
    }

    pub fn with_paths(mut self, paths: Vec<ServicePath>) -> Self {
        self.paths = paths;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default_group = true;
        self
    }

    /// HTTP services fall back to the longest matching prefix, RPC services
    /// only match exactly.
    pub fn path(&self, path: &str, service_type: ServiceType) -> Option<&ServicePath> {
        let exact = self.paths.iter().find(|candidate| candidate.path == path);
        if exact.is_some() || service_type == ServiceType::Rpc {
            return exact;
        }
        self.paths
            .iter()
            .filter(|candidate| path_matches(&candidate.path, path))
            .max_by_key(|candidate| candidate.path.len())
    }

    pub fn effective_policy(&self, parent: &ServicePolicy) -> Arc<ServicePolicy> {
        self.effective
            .get_or_init(|| effective(self.policy.as_ref(), parent))
            .clone()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub service_type: ServiceType,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub groups: Vec<ServiceGroup>,
    #[serde(default)]
    pub policy: Option<ServicePolicy>,
    #[serde(default)]
    pub owners: BTreeSet<String>,
    #[serde(skip)]
    effective: Memo<Arc<ServicePolicy>>,
}

impl Service {
    pub fn new(name: impl Into<String>, service_type: ServiceType, policy: Option<ServicePolicy>) -> Self {
        Self {
            name: name.into(),
            service_type,
            policy,
            ..Default::default()
        }
    }

    pub fn with_groups(mut self, groups: Vec<ServiceGroup>) -> Self {
        self.groups = groups;
        self
    }

    /// The named group, or the default group when no name is given or the
    /// name is unknown.
    pub fn group(&self, name: Option<&str>) -> Option<&ServiceGroup> {
        name.and_then(|name| self.groups.iter().find(|group| group.name == name))
            .or_else(|| self.groups.iter().find(|group| group.default_group))
            .or_else(|| self.groups.iter().find(|group| group.name == "default"))
    }

    pub fn effective_policy(&self) -> Arc<ServicePolicy> {
        self.effective
            .get_or_init(|| Arc::new(self.policy.clone().unwrap_or_default()))
            .clone()
    }

    /// Folds the tree contributed by `owner` into `base`. Nodes present on
    /// both sides keep the union of their owners, and the update's policy
    /// wins when it carries one.
    pub fn merge(base: Option<&Service>, update: &Service, owner: &str) -> Service {
        <Service as OwnedNode>::merge_node(base, update, owner)
    }

    /// Removes everything contributed only by `owner`. Returns `None` when no
    /// owner is left on the service itself.
    pub fn strip_owner(&self, owner: &str) -> Option<Service> {
        self.strip(owner)
    }
}

trait OwnedNode: Clone {
    fn key(&self) -> &str;
    fn owners(&self) -> &BTreeSet<String>;
    fn merge_node(base: Option<&Self>, update: &Self, owner: &str) -> Self;
    fn strip(&self, owner: &str) -> Option<Self>;
}

fn merge_owners(base: Option<&BTreeSet<String>>, update: &BTreeSet<String>, owner: &str) -> BTreeSet<String> {
    let mut owners: BTreeSet<String> = base.cloned().unwrap_or_default();
    owners.extend(update.iter().cloned());
    owners.insert(owner.to_string());
    owners
}

fn merge_policy(base: Option<&ServicePolicy>, update: Option<&ServicePolicy>) -> Option<ServicePolicy> {
    update.or(base).cloned()
}

fn merge_nodes<T: OwnedNode>(base: &[T], update: &[T], owner: &str) -> Vec<T> {
    let mut merged: Vec<T> = base
        .iter()
        .map(|node| match update.iter().find(|other| other.key() == node.key()) {
            Some(other) => T::merge_node(Some(node), other, owner),
            None => node.clone(),
        })
        .collect();
    for node in update {
        if !base.iter().any(|other| other.key() == node.key()) {
            merged.push(T::merge_node(None, node, owner));
        }
    }
    merged
}

fn strip_nodes<T: OwnedNode>(nodes: &[T], owner: &str) -> Vec<T> {
    nodes.iter().filter_map(|node| node.strip(owner)).collect()
}

fn remaining_owners(owners: &BTreeSet<String>, owner: &str) -> Option<BTreeSet<String>> {
    let mut owners = owners.clone();
    owners.remove(owner);
    if owners.is_empty() {
        None
    } else {
        Some(owners)
    }
}

impl OwnedNode for ServiceMethod {
    fn key(&self) -> &str {
        &self.name
    }

    fn owners(&self) -> &BTreeSet<String> {
        &self.owners
    }

    fn merge_node(base: Option<&Self>, update: &Self, owner: &str) -> Self {
        Self {
            name: update.name.clone(),
            policy: merge_policy(base.and_then(|b| b.policy.as_ref()), update.policy.as_ref()),
            owners: merge_owners(base.map(OwnedNode::owners), &update.owners, owner),
            effective: Memo::new(),
        }
    }

    fn strip(&self, owner: &str) -> Option<Self> {
        let owners = remaining_owners(&self.owners, owner)?;
        Some(Self {
            owners,
            ..self.clone()
        })
    }
}

impl OwnedNode for ServicePath {
    fn key(&self) -> &str {
        &self.path
    }

    fn owners(&self) -> &BTreeSet<String> {
        &self.owners
    }

    fn merge_node(base: Option<&Self>, update: &Self, owner: &str) -> Self {
        Self {
            path: update.path.clone(),
            methods: merge_nodes(base.map(|b| b.methods.as_slice()).unwrap_or_default(), &update.methods, owner),
            policy: merge_policy(base.and_then(|b| b.policy.as_ref()), update.policy.as_ref()),
            owners: merge_owners(base.map(OwnedNode::owners), &update.owners, owner),
            effective: Memo::new(),
        }
    }

    fn strip(&self, owner: &str) -> Option<Self> {
        let owners = remaining_owners(&self.owners, owner)?;
        Some(Self {
            methods: strip_nodes(&self.methods, owner),
            owners,
            ..self.clone()
        })
    }
}

impl OwnedNode for ServiceGroup {
    fn key(&self) -> &str {
        &self.name
    }

    fn owners(&self) -> &BTreeSet<String> {
        &self.owners
    }

    fn merge_node(base: Option<&Self>, update: &Self, owner: &str) -> Self {
        Self {
            name: update.name.clone(),
            default_group: update.default_group || base.map(|b| b.default_group).unwrap_or(false),
            paths: merge_nodes(base.map(|b| b.paths.as_slice()).unwrap_or_default(), &update.paths, owner),
            policy: merge_policy(base.and_then(|b| b.policy.as_ref()), update.policy.as_ref()),
            owners: merge_owners(base.map(OwnedNode::owners), &update.owners, owner),
            effective: Memo::new(),
        }
    }

    fn strip(&self, owner: &str) -> Option<Self> {
        let owners = remaining_owners(&self.owners, owner)?;
        Some(Self {
            paths: strip_nodes(&self.paths, owner),
            owners,
            ..self.clone()
        })
    }
}

impl OwnedNode for Service {
    fn key(&self) -> &str {
        &self.name
    }

    fn owners(&self) -> &BTreeSet<String> {
        &self.owners
    }

    fn merge_node(base: Option<&Self>, update: &Self, owner: &str) -> Self {
        Self {
            name: update.name.clone(),
            service_type: update.service_type,
            version: update.version.max(base.map(|b| b.version).unwrap_or(0)),
            groups: merge_nodes(base.map(|b| b.groups.as_slice()).unwrap_or_default(), &update.groups, owner),
            policy: merge_policy(base.and_then(|b| b.policy.as_ref()), update.policy.as_ref()),
            owners: merge_owners(base.map(OwnedNode::owners), &update.owners, owner),
            effective: Memo::new(),
        }
    }

    fn strip(&self, owner: &str) -> Option<Self> {
        let owners = remaining_owners(&self.owners, owner)?;
        Some(Self {
            groups: strip_nodes(&self.groups, owner),
            owners,
            ..self.clone()
        })
    }
}
