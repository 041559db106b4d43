#[derive(Clone, Debug)]
pub struct StaticConfigItem {
    pub key: &'static str,
    pub description: &'static str,
    pub value_type: &'static str,
    pub default_value: &'static str,
}

const fn item(
    key: &'static str,
    description: &'static str,
    value_type: &'static str,
    default_value: &'static str,
) -> StaticConfigItem {
    StaticConfigItem {
        key,
        description,
        value_type,
        default_value,
    }
}

pub static STATIC_CONFIG_TABLE: &[StaticConfigItem] = &[
    item("app.name", "Application name reported to callers", "string", ""),
    item("app.service", "Service provided by this application", "string", ""),
    item("location.region", "Region of this instance", "string", ""),
    item("location.zone", "Availability zone of this instance", "string", ""),
    item("location.live_space_id", "Live space this instance belongs to", "string", ""),
    item("location.unit", "Unit this instance runs in", "string", ""),
    item("location.cell", "Cell this instance runs in", "string", ""),
    item("location.lane_space_id", "Lane space this instance belongs to", "string", ""),
    item("location.lane", "Lane this instance serves", "string", ""),
    item("location.ip", "Address of this instance", "string", ""),
    item("live.enabled", "Enable unit and cell routing", "boolean", "true"),
    item("live.gateway", "Instance is a gateway that re-routes downstream", "boolean", "false"),
    item("live.max_failover_hops", "Failover hops allowed before rejecting as escaped", "number", "1"),
    item("lane.enabled", "Enable lane routing", "boolean", "false"),
    item("flow_control.enabled", "Enable auth, permission and limit filters", "boolean", "true"),
    item("flow_control.concurrency_limiter", "Default concurrency limiter type", "string", "semaphore"),
    item("flow_control.rate_limiter", "Default rate limiter type", "string", "fixed_window"),
    item("flow_control.load_interval_ms", "Load metric refresh interval", "number", "1000"),
    item("governance.initialize_timeout_ms", "Policy readiness wait timeout", "number", "10000"),
    item("governance.sync_sources", "Comma separated policy sync sources", "string", ""),
    item("event.capacity", "Governance event channel capacity", "number", "1024"),
    item("filter.inbound", "Comma separated inbound filters, empty for all", "string", ""),
];
