use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::lane::LaneSpace;
use crate::memo::Memo;
use crate::service::Service;
use crate::space::{AccessMode, LiveDomain, LiveSpace, Place};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DbCluster {
    pub name: String,
    /// `host:port` entries.
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub live_space_id: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub access_mode: AccessMode,
}

impl Place for DbCluster {
    fn code(&self) -> &str {
        &self.name
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }
}

#[derive(Debug, Default)]
struct PolicyIndex {
    live_spaces: HashMap<String, usize>,
    lane_spaces: HashMap<String, usize>,
    services: HashMap<String, usize>,
    domains: HashMap<String, (usize, usize)>,
    db_clusters: HashMap<String, usize>,
    db_addresses: HashMap<String, usize>,
}

/// One published snapshot of everything the engine governs. Never mutated
/// after publishing; the builders return a new snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GovernancePolicy {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub live_spaces: Vec<Arc<LiveSpace>>,
    #[serde(default)]
    pub lane_spaces: Vec<Arc<LaneSpace>>,
    #[serde(default)]
    pub services: Vec<Arc<Service>>,
    #[serde(default)]
    pub db_clusters: Vec<Arc<DbCluster>>,
    #[serde(skip)]
    index: Memo<PolicyIndex>,
}

impl GovernancePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    fn index(&self) -> &PolicyIndex {
        self.index.get_or_init(|| {
            let mut index = PolicyIndex::default();
            for (pos, space) in self.live_spaces.iter().enumerate() {
                index.live_spaces.insert(space.id.clone(), pos);
                for (domain_pos, domain) in space.domains.iter().enumerate() {
                    index
                        .domains
                        .entry(domain.host.to_lowercase())
                        .or_insert((pos, domain_pos));
                }
            }
            for (pos, space) in self.lane_spaces.iter().enumerate() {
                index.lane_spaces.insert(space.id.clone(), pos);
            }
            for (pos, service) in self.services.iter().enumerate() {
                index.services.insert(service.name.clone(), pos);
            }
            for (pos, cluster) in self.db_clusters.iter().enumerate() {
                index.db_clusters.insert(cluster.name.clone(), pos);
                for address in &cluster.addresses {
                    index.db_addresses.insert(address.to_lowercase(), pos);
                }
            }
            index
        })
    }

    pub fn live_space(&self, id: &str) -> Option<&Arc<LiveSpace>> {
        self.index()
            .live_spaces
            .get(id)
            .and_then(|pos| self.live_spaces.get(*pos))
    }

    pub fn lane_space(&self, id: &str) -> Option<&Arc<LaneSpace>> {
        self.index()
            .lane_spaces
            .get(id)
            .and_then(|pos| self.lane_spaces.get(*pos))
    }

    pub fn service(&self, name: &str) -> Option<&Arc<Service>> {
        self.index()
            .services
            .get(name)
            .and_then(|pos| self.services.get(*pos))
    }

    pub fn domain(&self, host: &str) -> Option<(&Arc<LiveSpace>, &LiveDomain)> {
        let (space_pos, domain_pos) = *self.index().domains.get(&host.to_lowercase())?;
        let space = self.live_spaces.get(space_pos)?;
        let domain = space.domains.get(domain_pos)?;
        Some((space, domain))
    }

    pub fn db_cluster(&self, name: &str) -> Option<&Arc<DbCluster>> {
        self.index()
            .db_clusters
            .get(name)
            .and_then(|pos| self.db_clusters.get(*pos))
    }

    pub fn db_cluster_by_address(&self, host: &str, port: u16) -> Option<&Arc<DbCluster>> {
        let key = format!("{host}:{port}").to_lowercase();
        self.index()
            .db_addresses
            .get(&key)
            .and_then(|pos| self.db_clusters.get(*pos))
    }

    fn next(&self) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next
    }

    pub fn with_service(&self, service: Service) -> Self {
        let mut next = self.next();
        let service = Arc::new(service);
        match next.services.iter().position(|item| item.name == service.name) {
            Some(pos) => next.services[pos] = service,
            None => next.services.push(service),
        }
        next
    }

    /// Replaces what `owner` contributed to a service, keeping the parts
    /// other owners contributed.
    pub fn with_owned_service(&self, update: Service, owner: &str) -> Self {
        let base = self
            .service(&update.name)
            .and_then(|service| service.strip_owner(owner));
        let merged = Service::merge(base.as_ref(), &update, owner);
        self.with_service(merged)
    }

    pub fn without_service(&self, name: &str) -> Self {
        let mut next = self.next();
        next.services.retain(|service| service.name != name);
        next
    }

    pub fn without_owner(&self, owner: &str) -> Self {
        let mut next = self.next();
        next.services = self
            .services
            .iter()
            .filter_map(|service| service.strip_owner(owner).map(Arc::new))
            .collect();
        next
    }

    pub fn with_live_spaces(&self, spaces: Vec<LiveSpace>) -> Self {
        let mut next = self.next();
        next.live_spaces = spaces.into_iter().map(Arc::new).collect();
        next
    }

    pub fn with_lane_spaces(&self, spaces: Vec<LaneSpace>) -> Self {
        let mut next = self.next();
        next.lane_spaces = spaces.into_iter().map(Arc::new).collect();
        next
    }

    pub fn with_db_clusters(&self, clusters: Vec<DbCluster>) -> Self {
        let mut next = self.next();
        next.db_clusters = clusters.into_iter().map(Arc::new).collect();
        next
    }
}
