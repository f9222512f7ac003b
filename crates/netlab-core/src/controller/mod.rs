// ── Backend controller contract ──
//
// One implementation per virtualization backend. The orchestrator and hub
// only ever see `Arc<dyn Controller>`.

mod error;
pub mod sim;

use std::net::Ipv4Addr;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::MonitoringEndpoint;
use crate::model::{Device, Network};

pub use error::BackendError;

/// Environment keys carrying the telemetry sink into a monitored unit.
pub const MONITORING_ADDRESS_ENV: &str = "MONITORING_ADDRESS";
pub const MONITORING_PORT_ENV: &str = "MONITORING_PORT";

/// Output of a command run inside a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Image tag used when a device is built from a local context.
pub fn build_tag_for(device: &Device) -> String {
    format!("netlab/{}:latest", device.name.to_lowercase())
}

/// Capability set of a virtualization backend.
///
/// Every call may block on the backend and none of them retry. Operations
/// are not idempotent unless stated: creating the same network twice is a
/// caller error.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Stable name of the backend, for diagnostics only.
    fn identifier(&self) -> &str;

    // ── Networks ─────────────────────────────────────────────────────

    async fn create_network(&self, network: &Network) -> Result<(), BackendError>;

    /// Fails with `NetworkBusy` while devices are still attached.
    async fn destroy_network(&self, network: &Network) -> Result<(), BackendError>;

    // ── Images / deployment ──────────────────────────────────────────

    async fn build_image(&self, context: &Path, tag: &str) -> Result<(), BackendError>;

    async fn deploy_device(&self, device: &Device, tag: &str) -> Result<(), BackendError>;

    /// Deploy with the telemetry sink coordinates in the unit's environment.
    async fn deploy_device_with_monitoring(
        &self,
        device: &Device,
        tag: &str,
        monitoring: &MonitoringEndpoint,
    ) -> Result<(), BackendError>;

    /// Build an image from `context`, then deploy it.
    async fn deploy_device_from_file(
        &self,
        device: &Device,
        context: &Path,
    ) -> Result<(), BackendError> {
        let tag = build_tag_for(device);
        self.build_image(context, &tag).await?;
        self.deploy_device(device, &tag).await
    }

    // ── Attachments ──────────────────────────────────────────────────

    async fn connect_device_to_network(
        &self,
        device: &Device,
        network: &Network,
    ) -> Result<(), BackendError>;

    /// Attach to every network or to none of them.
    ///
    /// On the first failure the networks attached so far are detached again
    /// (best effort) and the failure is reported as `PartialConnect`.
    async fn connect_device_to_networks(
        &self,
        device: &Device,
        networks: &[&Network],
    ) -> Result<(), BackendError> {
        let mut attached: Vec<&Network> = Vec::with_capacity(networks.len());
        for network in networks {
            if let Err(source) = self.connect_device_to_network(device, network).await {
                for done in attached.iter().rev() {
                    if let Err(e) = self.disconnect_device(device, done).await {
                        tracing::warn!(
                            device = %device.name,
                            network = %done.name,
                            error = %e,
                            "failed to detach after partial connect"
                        );
                    }
                }
                return Err(BackendError::PartialConnect {
                    device: device.name.clone(),
                    network: network.name.clone(),
                    attached: attached.iter().map(|n| n.name.clone()).collect(),
                    source: Box::new(source),
                });
            }
            attached.push(network);
        }
        Ok(())
    }

    /// Fails with `NotConnected` if the device was never attached.
    async fn disconnect_device(
        &self,
        device: &Device,
        network: &Network,
    ) -> Result<(), BackendError>;

    // ── Runtime ──────────────────────────────────────────────────────

    async fn stop_device(&self, device: &Device) -> Result<(), BackendError>;

    async fn start_device(&self, device: &Device) -> Result<(), BackendError>;

    /// Stop (if running) then remove the unit.
    async fn destroy_device(&self, device: &Device) -> Result<(), BackendError>;

    async fn execute_command(
        &self,
        device: &Device,
        command: &str,
    ) -> Result<ExecOutput, BackendError>;

    // ── Gateway discovery ────────────────────────────────────────────

    /// Network address of the device's default gateway network.
    async fn find_gw_network_address(&self, device: &Device) -> Result<Ipv4Addr, BackendError>;

    /// Address of the default gateway itself.
    async fn find_gw_address(&self, device: &Device) -> Result<Ipv4Addr, BackendError>;

    /// Prefix length of the default gateway network.
    async fn find_gw_mask(&self, device: &Device) -> Result<u8, BackendError>;
}
