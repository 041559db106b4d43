use control_plane::GovernanceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterKey {
    Auth,
    Permission,
    ConcurrencyLimit,
    RateLimit,
    LoadLimit,
    Ready,
    Unit,
    Cell,
    Failover,
}

impl FilterKey {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "auth" => Some(Self::Auth),
            "permission" => Some(Self::Permission),
            "concurrency_limit" | "concurrency-limit" | "concurrencyLimit" => Some(Self::ConcurrencyLimit),
            "rate_limit" | "rate-limit" | "rateLimit" => Some(Self::RateLimit),
            "load_limit" | "load-limit" | "loadLimit" => Some(Self::LoadLimit),
            "ready" => Some(Self::Ready),
            "unit" => Some(Self::Unit),
            "cell" => Some(Self::Cell),
            "failover" => Some(Self::Failover),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::ConcurrencyLimit => "concurrency_limit",
            Self::RateLimit => "rate_limit",
            Self::LoadLimit => "load_limit",
            Self::Ready => "ready",
            Self::Unit => "unit",
            Self::Cell => "cell",
            Self::Failover => "failover",
        }
    }

    /// Lower runs first.
    pub fn order(&self) -> u32 {
        match self {
            Self::Auth => 100,
            Self::Permission => 200,
            Self::ConcurrencyLimit => 300,
            Self::RateLimit => 400,
            Self::LoadLimit => 500,
            Self::Ready => 600,
            Self::Unit => 700,
            Self::Cell => 800,
            Self::Failover => 900,
        }
    }

    pub fn is_flow_control(&self) -> bool {
        matches!(
            self,
            Self::Auth | Self::Permission | Self::ConcurrencyLimit | Self::RateLimit | Self::LoadLimit
        )
    }
}

#[derive(Debug, Clone)]
pub struct FilterPipeline {
    pub keys: Vec<FilterKey>,
}

impl FilterPipeline {
    pub fn from_config(config: &GovernanceConfig) -> Self {
        let mut keys = if config.inbound_filters.is_empty() {
            default_inbound_keys()
        } else {
            parse_keys(&config.inbound_filters)
        };
        if !config.flow_control_enabled {
            keys.retain(|key| !key.is_flow_control());
        }
        keys.sort_by_key(FilterKey::order);
        keys.dedup();
        Self { keys }
    }

    pub fn contains(&self, key: FilterKey) -> bool {
        self.keys.contains(&key)
    }
}

fn parse_keys(values: &[String]) -> Vec<FilterKey> {
    values
        .iter()
        .filter_map(|value| FilterKey::parse(value))
        .collect()
}

fn default_inbound_keys() -> Vec<FilterKey> {
    vec![
        FilterKey::Auth,
        FilterKey::Permission,
        FilterKey::ConcurrencyLimit,
        FilterKey::RateLimit,
        FilterKey::LoadLimit,
        FilterKey::Ready,
        FilterKey::Unit,
        FilterKey::Cell,
        FilterKey::Failover,
    ]
}
