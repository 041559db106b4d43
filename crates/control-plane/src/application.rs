use serde::{Deserialize, Serialize};

/// Where this process runs.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub region: Option<String>,
    pub zone: Option<String>,
    pub live_space_id: Option<String>,
    pub unit: Option<String>,
    pub cell: Option<String>,
    pub lane_space_id: Option<String>,
    pub lane: Option<String>,
    pub ip: Option<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    /// The service this process provides, if any.
    pub service: Option<String>,
    pub location: Location,
}
