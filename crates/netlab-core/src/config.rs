// ── Runtime hub configuration ──
//
// These types describe *how* the hub deploys: which image routers get by
// default, where telemetry goes, how long a backend call may take.
// They never touch disk. `netlab-config` builds a `HubConfig` and hands it in.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_ROUTER_TAG: &str = "netlab/router:latest";
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Telemetry sink coordinates wired into monitored devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringEndpoint {
    pub address: String,
    pub port: u16,
}

impl MonitoringEndpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for MonitoringEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Configuration for a single hub instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Image for devices that declare no image of their own.
    pub router_tag: String,
    /// When set, tag deployments go through the monitoring variant.
    pub monitoring: Option<MonitoringEndpoint>,
    /// Upper bound for any single backend call.
    pub operation_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            router_tag: DEFAULT_ROUTER_TAG.into(),
            monitoring: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl HubConfig {
    pub fn with_router_tag(mut self, tag: impl Into<String>) -> Self {
        self.router_tag = tag.into();
        self
    }

    pub fn with_monitoring(mut self, endpoint: MonitoringEndpoint) -> Self {
        self.monitoring = Some(endpoint);
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}
