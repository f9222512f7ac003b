// ── Control-plane hub ──
//
// The one object callers hold. Owns the controller handle, both registries
// and the active topology, and serializes lifecycle operations behind a
// session lock. Reads go straight to the registries without the lock.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use strum::Display;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::HubConfig;
use crate::controller::{Controller, ExecOutput};
use crate::error::CoreError;
use crate::model::{Application, Device, DeviceState, Topology};
use crate::orchestrator::{CleanupReport, DeployReport, DeploySettings, Orchestrator};
use crate::registry::{ApplicationEntry, DeviceEntry, Registries};
use crate::stream::{EntityStream, Snapshot};

// ── HubState ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum HubState {
    /// No topology deployed. Only `deploy_topology` does anything useful.
    Uninitialized,
    Active,
}

/// Result of [`Hub::deploy_application`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationOutcome {
    Deployed { application: Arc<ApplicationEntry> },
    /// The target network is not part of the active topology. Nothing was
    /// sent to the backend.
    NetworkNotInTopology { network: String },
}

/// A device's default-route view, as discovered through the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayInfo {
    pub network_address: Ipv4Addr,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

// ── Hub ──────────────────────────────────────────────────────────────

/// Entry point of the control plane.
///
/// Cheaply cloneable via `Arc<HubInner>`; clones share state. Separate
/// `Hub::new` calls give fully independent instances.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    controller: Arc<dyn Controller>,
    config: HubConfig,
    registries: Registries,
    /// Held for the whole of each lifecycle operation.
    session: AsyncMutex<()>,
    topology: Mutex<Option<Arc<Topology>>>,
    /// Names destroyed since the topology was deployed.
    destroyed: Mutex<HashSet<String>>,
    state: watch::Sender<HubState>,
    /// Token of the operation currently in flight.
    cancel: Mutex<CancellationToken>,
}

impl Hub {
    /// Wire a controller into a fresh hub. Does not touch the backend.
    pub fn new(controller: Arc<dyn Controller>, config: HubConfig) -> Self {
        let (state, _) = watch::channel(HubState::Uninitialized);
        Self {
            inner: Arc::new(HubInner {
                controller,
                config,
                registries: Registries::default(),
                session: AsyncMutex::new(()),
                topology: Mutex::new(None),
                destroyed: Mutex::new(HashSet::new()),
                state,
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Direct backend access, bypassing the registries.
    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.inner.controller
    }

    pub fn state(&self) -> HubState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<HubState> {
        self.inner.state.subscribe()
    }

    pub fn topology(&self) -> Option<Arc<Topology>> {
        lock(&self.inner.topology).clone()
    }

    // ── Registry reads ───────────────────────────────────────────────

    pub fn get_device(&self, name: &str) -> Option<Arc<DeviceEntry>> {
        self.inner.registries.devices.get(name)
    }

    pub fn get_application(&self, name: &str) -> Option<Arc<ApplicationEntry>> {
        self.inner.registries.applications.get(name)
    }

    /// All deployed devices (applications included), sorted by name.
    pub fn devices(&self) -> Snapshot<DeviceEntry> {
        self.inner.registries.devices.snapshot()
    }

    pub fn applications(&self) -> Snapshot<ApplicationEntry> {
        self.inner.registries.applications.snapshot()
    }

    pub fn subscribe_devices(&self) -> EntityStream<DeviceEntry> {
        self.inner.registries.devices.subscribe()
    }

    pub fn subscribe_applications(&self) -> EntityStream<ApplicationEntry> {
        self.inner.registries.applications.subscribe()
    }

    /// Lifecycle position of a device of the active topology, or of an
    /// application deployed onto it.
    pub fn device_state(&self, name: &str) -> Option<DeviceState> {
        if self.inner.registries.devices.contains(name) {
            return Some(DeviceState::Deployed);
        }
        if lock(&self.inner.destroyed).contains(name) {
            return Some(DeviceState::Destroyed);
        }
        self.topology()
            .filter(|t| t.device(name).is_some())
            .map(|_| DeviceState::Pending)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Deploy `topology` and make it the active one.
    ///
    /// Fails with `TopologyAlreadyDeployed` while another topology is
    /// active. On a failed deploy the hub stays uninitialized with empty
    /// registries.
    pub async fn deploy_topology(&self, topology: Topology) -> Result<DeployReport, CoreError> {
        let _session = self.inner.session.lock().await;
        if self.topology().is_some() {
            return Err(CoreError::TopologyAlreadyDeployed);
        }

        let orchestrator = self.orchestrator();
        match orchestrator
            .deploy_topology(&topology, &self.inner.registries)
            .await
        {
            Ok(report) => {
                *lock(&self.inner.topology) = Some(Arc::new(topology));
                lock(&self.inner.destroyed).clear();
                self.inner.state.send_replace(HubState::Active);
                info!(deployment = %report.deployment_id, "hub active");
                Ok(report)
            }
            Err(e) => {
                self.inner.registries.clear();
                Err(e)
            }
        }
    }

    /// Deploy `app` from `tag` onto `network_name` of the active topology.
    ///
    /// `env` entries are appended to the application's own environment.
    /// A network outside the topology is not an error: the outcome says so
    /// and the backend is never called.
    pub async fn deploy_application(
        &self,
        app: &Application,
        network_name: &str,
        tag: &str,
        env: Option<Vec<String>>,
    ) -> Result<ApplicationOutcome, CoreError> {
        let _session = self.inner.session.lock().await;
        let topology = self.topology().ok_or(CoreError::NoActiveTopology)?;

        let Some(network) = topology.network(network_name) else {
            warn!(
                application = app.name(),
                network = network_name,
                "network is not part of the active topology; application not deployed"
            );
            return Ok(ApplicationOutcome::NetworkNotInTopology {
                network: network_name.to_owned(),
            });
        };

        let registries = &self.inner.registries;
        if registries.applications.contains(app.name()) {
            return Err(CoreError::ApplicationExists {
                name: app.name().to_owned(),
            });
        }
        if registries.devices.contains(app.name()) {
            return Err(CoreError::DeviceExists {
                name: app.name().to_owned(),
            });
        }

        let env = env.unwrap_or_default();
        self.orchestrator()
            .deploy_device_to_network(app.device(), network, tag, &env, registries)
            .await?;
        lock(&self.inner.destroyed).remove(app.name());

        let application = registries
            .applications
            .get(app.name())
            .ok_or_else(|| CoreError::Internal(format!("'{}' missing after deploy", app.name())))?;
        Ok(ApplicationOutcome::Deployed { application })
    }

    /// Destroy a deployed device and drop it from the registries.
    ///
    /// Returns `false` without touching the backend if no device of that
    /// name is deployed. If the backend refuses, the entry stays.
    pub async fn destroy_device(&self, name: &str) -> Result<bool, CoreError> {
        let _session = self.inner.session.lock().await;
        let Some(entry) = self.inner.registries.devices.get(name) else {
            return Ok(false);
        };
        self.destroy_entry(&entry.item).await?;
        Ok(true)
    }

    /// Same as [`destroy_device`](Self::destroy_device), looked up in the
    /// application registry.
    pub async fn destroy_application(&self, name: &str) -> Result<bool, CoreError> {
        let _session = self.inner.session.lock().await;
        let Some(entry) = self.inner.registries.applications.get(name) else {
            return Ok(false);
        };
        self.destroy_entry(entry.item.device()).await?;
        Ok(true)
    }

    /// Tear down everything this hub deployed and return to
    /// `Uninitialized`.
    ///
    /// Best effort: failures are collected in the report, never returned
    /// early, and the hub is reset regardless.
    pub async fn destroy_hub(&self) -> Result<CleanupReport, CoreError> {
        let _session = self.inner.session.lock().await;
        let topology = lock(&self.inner.topology).take();
        if topology.is_none() && self.inner.registries.is_empty() {
            return Ok(CleanupReport::default());
        }

        let report = self
            .orchestrator()
            .cleanup(topology.as_deref(), &self.inner.registries)
            .await;

        self.inner.registries.clear();
        lock(&self.inner.destroyed).clear();
        self.inner.state.send_replace(HubState::Uninitialized);
        if report.is_clean() {
            info!("hub destroyed");
        } else {
            warn!(
                failures = report.failures.len(),
                "hub destroyed with leftover backend resources"
            );
        }
        Ok(report)
    }

    /// Cancel the lifecycle operation in flight and any runtime call made
    /// while it runs. A running deploy unwinds through compensation and
    /// returns `Cancelled`.
    pub fn cancel_in_flight(&self) {
        lock(&self.inner.cancel).cancel();
    }

    // ── Runtime operations ───────────────────────────────────────────

    pub async fn stop_device(&self, name: &str) -> Result<(), CoreError> {
        let device = self.deployed(name)?;
        self.runtime_orchestrator()
            .guard(
                format!("stop_device({name})"),
                self.inner.controller.stop_device(&device),
            )
            .await
    }

    pub async fn start_device(&self, name: &str) -> Result<(), CoreError> {
        let device = self.deployed(name)?;
        self.runtime_orchestrator()
            .guard(
                format!("start_device({name})"),
                self.inner.controller.start_device(&device),
            )
            .await
    }

    pub async fn execute_command(&self, name: &str, command: &str) -> Result<ExecOutput, CoreError> {
        let device = self.deployed(name)?;
        self.runtime_orchestrator()
            .guard(
                format!("execute_command({name})"),
                self.inner.controller.execute_command(&device, command),
            )
            .await
    }

    /// Discover the device's gateway network through the backend.
    pub async fn gateway(&self, name: &str) -> Result<GatewayInfo, CoreError> {
        let device = self.deployed(name)?;
        let orchestrator = self.runtime_orchestrator();
        let controller = &self.inner.controller;
        let op = format!("find_gateway({name})");

        let network_address = orchestrator
            .guard(op.clone(), controller.find_gw_network_address(&device))
            .await?;
        let address = orchestrator
            .guard(op.clone(), controller.find_gw_address(&device))
            .await?;
        let prefix_len = orchestrator
            .guard(op, controller.find_gw_mask(&device))
            .await?;
        Ok(GatewayInfo {
            network_address,
            address,
            prefix_len,
        })
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Orchestrator bound to a fresh cancellation token, which becomes the
    /// one `cancel_in_flight` targets. Callers must hold the session lock.
    fn orchestrator(&self) -> Orchestrator {
        let token = CancellationToken::new();
        *lock(&self.inner.cancel) = token.clone();
        self.orchestrator_with(token)
    }

    /// Orchestrator for calls made outside the session lock. Never replaces
    /// the session token; a cancel of the running session reaches it too.
    fn runtime_orchestrator(&self) -> Orchestrator {
        let token = {
            let session = lock(&self.inner.cancel);
            if session.is_cancelled() {
                CancellationToken::new()
            } else {
                session.child_token()
            }
        };
        self.orchestrator_with(token)
    }

    fn orchestrator_with(&self, token: CancellationToken) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(&self.inner.controller),
            DeploySettings::from(&self.inner.config),
            token,
        )
    }

    fn deployed(&self, name: &str) -> Result<Device, CoreError> {
        self.inner
            .registries
            .devices
            .get(name)
            .map(|entry| entry.item.clone())
            .ok_or_else(|| CoreError::DeviceNotFound {
                name: name.to_owned(),
            })
    }

    async fn destroy_entry(&self, device: &Device) -> Result<(), CoreError> {
        self.orchestrator().destroy(device).await?;
        self.inner.registries.forget(&device.name);
        lock(&self.inner.destroyed).insert(device.name.clone());
        info!(device = %device.name, "device destroyed");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::controller::sim::SimController;
    use crate::model::Subnet;

    fn hub() -> (Hub, Arc<SimController>) {
        let sim = Arc::new(SimController::new());
        let hub = Hub::new(Arc::clone(&sim) as Arc<dyn Controller>, HubConfig::default());
        (hub, sim)
    }

    fn topology() -> Topology {
        let subnet: Subnet = "10.0.0.0/24".parse().unwrap();
        Topology::builder()
            .network("lan1", subnet)
            .device(Device::router("router1").on_network("lan1"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn state_follows_lifecycle() {
        let (hub, _sim) = hub();
        let mut rx = hub.subscribe_state();
        assert_eq!(hub.state(), HubState::Uninitialized);

        hub.deploy_topology(topology()).await.unwrap();
        assert_eq!(hub.state(), HubState::Active);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), HubState::Active);

        hub.destroy_hub().await.unwrap();
        assert_eq!(hub.state(), HubState::Uninitialized);
        assert!(hub.topology().is_none());
    }

    #[tokio::test]
    async fn device_state_tracks_destroy() {
        let (hub, _sim) = hub();
        assert_eq!(hub.device_state("router1"), None);
        hub.deploy_topology(topology()).await.unwrap();
        assert_eq!(hub.device_state("router1"), Some(DeviceState::Deployed));

        assert!(hub.destroy_device("router1").await.unwrap());
        assert_eq!(hub.device_state("router1"), Some(DeviceState::Destroyed));
    }

    #[tokio::test]
    async fn runtime_operations_require_a_deployed_device() {
        let (hub, sim) = hub();
        hub.deploy_topology(topology()).await.unwrap();

        hub.stop_device("router1").await.unwrap();
        assert_eq!(sim.is_running("router1"), Some(false));
        hub.start_device("router1").await.unwrap();
        let out = hub.execute_command("router1", "ip addr").await.unwrap();
        assert_eq!(out.stdout, "ip addr\n");

        assert!(matches!(
            hub.stop_device("ghost").await,
            Err(CoreError::DeviceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn clones_share_state_and_instances_do_not() {
        let (other, _) = hub();
        let (hub, _sim) = hub();
        let clone = hub.clone();

        hub.deploy_topology(topology()).await.unwrap();
        assert_eq!(clone.state(), HubState::Active);
        assert!(clone.get_device("router1").is_some());
        assert_eq!(other.state(), HubState::Uninitialized);
        assert!(other.devices().is_empty());
    }
}
