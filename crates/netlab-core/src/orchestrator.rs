// ── Deployment orchestration ──
//
// Drives a `Controller` through multi-step deploys. Every successful step
// records its undo action; on failure the recorded actions run in reverse.
// Calls are sequential on the caller's task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{HubConfig, MonitoringEndpoint};
use crate::controller::{BackendError, Controller, build_tag_for};
use crate::error::CoreError;
use crate::model::{Application, Device, ImageSource, Network, Topology};
use crate::registry::{Entry, Registries};

// ── Settings and reports ─────────────────────────────────────────────

/// What the orchestrator needs from the hub configuration.
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub router_tag: String,
    pub monitoring: Option<MonitoringEndpoint>,
    pub operation_timeout: Duration,
}

impl From<&HubConfig> for DeploySettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            router_tag: config.router_tag.clone(),
            monitoring: config.monitoring.clone(),
            operation_timeout: config.operation_timeout,
        }
    }
}

/// A device reference to a network the topology does not declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedConnection {
    pub device: String,
    pub network: String,
}

impl SkippedConnection {
    pub fn to_error(&self) -> CoreError {
        CoreError::InvalidReference {
            device: self.device.clone(),
            network: self.network.clone(),
        }
    }
}

/// Outcome of a successful topology deployment.
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub deployment_id: Uuid,
    pub backend: String,
    /// Created networks, in creation order.
    pub networks: Vec<String>,
    /// Deployed devices, in deployment order.
    pub devices: Vec<String>,
    pub skipped: Vec<SkippedConnection>,
}

/// Outcome of a best-effort teardown.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub applications: Vec<String>,
    pub devices: Vec<String>,
    pub networks: Vec<String>,
    /// Every failed teardown step. The sweep never stops early.
    pub failures: Vec<CoreError>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ── Compensation ─────────────────────────────────────────────────────

/// Undo action for one deploy step.
///
/// `in_doubt` marks resources whose creating call timed out or was
/// cancelled: they may or may not exist, so "not found" while undoing them
/// is not a failure.
enum Compensation {
    DestroyNetwork { network: Network, in_doubt: bool },
    DestroyDevice { device: Device, in_doubt: bool },
}

fn in_doubt(err: &CoreError) -> bool {
    matches!(err, CoreError::Timeout { .. } | CoreError::Cancelled { .. })
}

// ── Orchestrator ─────────────────────────────────────────────────────

pub struct Orchestrator {
    controller: Arc<dyn Controller>,
    settings: DeploySettings,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        controller: Arc<dyn Controller>,
        settings: DeploySettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            controller,
            settings,
            cancel,
        }
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.settings
    }

    /// Run one controller call under the per-call timeout and the
    /// cancellation token.
    pub(crate) async fn guard<T, F>(&self, operation: String, call: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        debug!(%operation, "controller call");
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CoreError::Cancelled { operation }),
            res = tokio::time::timeout(self.settings.operation_timeout, call) => match res {
                Ok(inner) => inner.map_err(CoreError::from),
                Err(_) => Err(CoreError::Timeout {
                    operation,
                    timeout_secs: self.settings.operation_timeout.as_secs(),
                }),
            },
        }
    }

    /// Like [`guard`](Self::guard) but ignores cancellation. Used for undo
    /// and teardown steps, which must run even after a cancel.
    async fn guard_uncancellable<T, F>(&self, operation: String, call: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        debug!(%operation, "controller call");
        match tokio::time::timeout(self.settings.operation_timeout, call).await {
            Ok(inner) => inner.map_err(CoreError::from),
            Err(_) => Err(CoreError::Timeout {
                operation,
                timeout_secs: self.settings.operation_timeout.as_secs(),
            }),
        }
    }

    // ── Topology ─────────────────────────────────────────────────────

    /// Realize a whole topology, or nothing of it.
    ///
    /// On failure every resource created by this call has been destroyed
    /// (best effort) and removed from `registries`. Undo failures travel in
    /// `DeploymentFailed::rollback_failures`.
    pub async fn deploy_topology(
        &self,
        topology: &Topology,
        registries: &Registries,
    ) -> Result<DeployReport, CoreError> {
        let deployment_id = Uuid::new_v4();
        let span = info_span!(
            "deploy_topology",
            deployment = %deployment_id,
            backend = self.controller.identifier()
        );
        async {
            let mut report = DeployReport {
                deployment_id,
                backend: self.controller.identifier().to_owned(),
                networks: Vec::with_capacity(topology.network_count()),
                devices: Vec::with_capacity(topology.devices().len()),
                skipped: Vec::new(),
            };
            let mut undo = Vec::new();

            let failures = self.create_networks(topology, &mut undo, &mut report).await;
            if !failures.is_empty() {
                let rollback_failures = self.unwind(undo, registries).await;
                return Err(CoreError::DeploymentFailed {
                    cause: Box::new(CoreError::NetworksFailed { failures }),
                    rollback_failures,
                });
            }

            for device in topology.devices() {
                if let Err(cause) = self
                    .deploy_member(topology, device, registries, &mut undo, &mut report)
                    .await
                {
                    warn!(device = %device.name, error = %cause, "deployment failed, rolling back");
                    let rollback_failures = self.unwind(undo, registries).await;
                    return Err(CoreError::DeploymentFailed {
                        cause: Box::new(cause),
                        rollback_failures,
                    });
                }
            }

            info!(
                networks = report.networks.len(),
                devices = report.devices.len(),
                skipped = report.skipped.len(),
                "topology deployed"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Attempt every network; collect failures instead of stopping at the
    /// first one. Stops early only on cancellation.
    async fn create_networks(
        &self,
        topology: &Topology,
        undo: &mut Vec<Compensation>,
        report: &mut DeployReport,
    ) -> Vec<CoreError> {
        let mut failures = Vec::new();
        for network in topology.networks() {
            let op = format!("create_network({})", network.name);
            match self.guard(op, self.controller.create_network(network)).await {
                Ok(()) => {
                    undo.push(Compensation::DestroyNetwork {
                        network: network.clone(),
                        in_doubt: false,
                    });
                    report.networks.push(network.name.clone());
                }
                Err(e) => {
                    let cancelled = matches!(e, CoreError::Cancelled { .. });
                    if in_doubt(&e) {
                        undo.push(Compensation::DestroyNetwork {
                            network: network.clone(),
                            in_doubt: true,
                        });
                    }
                    warn!(network = %network.name, error = %e, "network creation failed");
                    failures.push(e);
                    if cancelled {
                        break;
                    }
                }
            }
        }
        failures
    }

    async fn deploy_member(
        &self,
        topology: &Topology,
        device: &Device,
        registries: &Registries,
        undo: &mut Vec<Compensation>,
        report: &mut DeployReport,
    ) -> Result<(), CoreError> {
        let (resolved, missing) = topology.resolve_networks(device);
        for network in missing {
            warn!(
                device = %device.name,
                %network,
                "device references a network outside the topology; not connecting"
            );
            report.skipped.push(SkippedConnection {
                device: device.name.clone(),
                network: network.to_owned(),
            });
        }

        let tag = self.deploy_unit(device, undo).await?;
        self.connect(device, &resolved).await?;
        let networks = resolved.iter().map(|n| n.name.clone()).collect();
        Self::register(device, networks, &tag, registries)?;
        report.devices.push(device.name.clone());
        Ok(())
    }

    // ── Single device ────────────────────────────────────────────────

    /// Deploy `device` from `tag` with `env` appended to its environment,
    /// attach it to `network` and register it.
    ///
    /// A failure after the deploy destroys the unit again. If that undo
    /// also fails the error is `DeploymentFailed`, otherwise the original
    /// error is returned as is.
    pub async fn deploy_device_to_network(
        &self,
        device: &Device,
        network: &Network,
        tag: &str,
        env: &[String],
        registries: &Registries,
    ) -> Result<(), CoreError> {
        let mut device = device.clone();
        device.env.extend(env.iter().cloned());

        let span = info_span!(
            "deploy_device",
            deployment = %Uuid::new_v4(),
            device = %device.name,
            network = %network.name
        );
        async {
            let mut undo = Vec::new();
            let result = self
                .deploy_attached(&device, network, tag, registries, &mut undo)
                .await;
            match result {
                Ok(()) => {
                    info!(tag, "device deployed");
                    Ok(())
                }
                Err(cause) => {
                    let rollback_failures = self.unwind(undo, registries).await;
                    if rollback_failures.is_empty() {
                        Err(cause)
                    } else {
                        Err(CoreError::DeploymentFailed {
                            cause: Box::new(cause),
                            rollback_failures,
                        })
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn deploy_attached(
        &self,
        device: &Device,
        network: &Network,
        tag: &str,
        registries: &Registries,
        undo: &mut Vec<Compensation>,
    ) -> Result<(), CoreError> {
        self.deploy_tagged(device, tag, undo).await?;
        self.connect(device, &[network]).await?;
        Self::register(device, vec![network.name.clone()], tag, registries)
    }

    /// Deploy according to the device's image source. Returns the tag used.
    async fn deploy_unit(
        &self,
        device: &Device,
        undo: &mut Vec<Compensation>,
    ) -> Result<String, CoreError> {
        match &device.image {
            Some(ImageSource::BuildContext(context)) => {
                let tag = build_tag_for(device);
                let op = format!("deploy_device_from_file({}, {})", device.name, context.display());
                let res = self
                    .guard(op, self.controller.deploy_device_from_file(device, context))
                    .await;
                Self::track_device(device, res, undo)?;
                Ok(tag)
            }
            Some(ImageSource::Tag(tag)) => {
                self.deploy_tagged(device, tag, undo).await?;
                Ok(tag.clone())
            }
            None => {
                let tag = self.settings.router_tag.clone();
                self.deploy_tagged(device, &tag, undo).await?;
                Ok(tag)
            }
        }
    }

    async fn deploy_tagged(
        &self,
        device: &Device,
        tag: &str,
        undo: &mut Vec<Compensation>,
    ) -> Result<(), CoreError> {
        let res = match &self.settings.monitoring {
            Some(sink) => {
                let op = format!("deploy_device_with_monitoring({}, {tag})", device.name);
                self.guard(
                    op,
                    self.controller
                        .deploy_device_with_monitoring(device, tag, sink),
                )
                .await
            }
            None => {
                let op = format!("deploy_device({}, {tag})", device.name);
                self.guard(op, self.controller.deploy_device(device, tag))
                    .await
            }
        };
        Self::track_device(device, res, undo)
    }

    /// Record the undo action for a deploy attempt.
    fn track_device(
        device: &Device,
        res: Result<(), CoreError>,
        undo: &mut Vec<Compensation>,
    ) -> Result<(), CoreError> {
        match &res {
            Ok(()) => undo.push(Compensation::DestroyDevice {
                device: device.clone(),
                in_doubt: false,
            }),
            Err(e) if in_doubt(e) => undo.push(Compensation::DestroyDevice {
                device: device.clone(),
                in_doubt: true,
            }),
            Err(_) => {}
        }
        res
    }

    async fn connect(&self, device: &Device, networks: &[&Network]) -> Result<(), CoreError> {
        match networks {
            [] => Ok(()),
            [network] => {
                let op = format!("connect_device_to_network({}, {})", device.name, network.name);
                self.guard(op, self.controller.connect_device_to_network(device, network))
                    .await
            }
            many => {
                let names: Vec<&str> = many.iter().map(|n| n.name.as_str()).collect();
                let op = format!(
                    "connect_device_to_networks({}, [{}])",
                    device.name,
                    names.join(", ")
                );
                self.guard(op, self.controller.connect_device_to_networks(device, many))
                    .await
            }
        }
    }

    /// Insert into the device registry, and the application registry for
    /// application devices.
    fn register(
        device: &Device,
        networks: Vec<String>,
        tag: &str,
        registries: &Registries,
    ) -> Result<(), CoreError> {
        registries.devices.insert(
            device.name.clone(),
            Entry::new(device.clone(), networks.clone(), tag),
        )?;
        if device.is_application() {
            registries.applications.insert(
                device.name.clone(),
                Entry::new(Application::from_device(device.clone()), networks, tag),
            )?;
        }
        debug!(device = %device.name, "registered");
        Ok(())
    }

    /// Run undo actions newest first. Returns the ones that failed.
    async fn unwind(&self, undo: Vec<Compensation>, registries: &Registries) -> Vec<CoreError> {
        let mut failures = Vec::new();
        for step in undo.into_iter().rev() {
            let (result, doubtful) = match &step {
                Compensation::DestroyDevice { device, in_doubt } => {
                    registries.forget(&device.name);
                    let op = format!("destroy_device({})", device.name);
                    let res = self
                        .guard_uncancellable(op, self.controller.destroy_device(device))
                        .await;
                    (res, *in_doubt)
                }
                Compensation::DestroyNetwork { network, in_doubt } => {
                    let op = format!("destroy_network({})", network.name);
                    let res = self
                        .guard_uncancellable(op, self.controller.destroy_network(network))
                        .await;
                    (res, *in_doubt)
                }
            };
            match result {
                Ok(()) => {}
                Err(e) if doubtful && e.is_not_found() => {}
                Err(e) => {
                    warn!(error = %e, "compensation failed");
                    failures.push(e);
                }
            }
        }
        failures
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Destroy every registered application, then every registered device,
    /// then the topology's networks. Entries leave the registries whether or
    /// not the backend call succeeds.
    pub async fn cleanup(
        &self,
        topology: Option<&Topology>,
        registries: &Registries,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();

        for entry in registries.applications.snapshot().iter() {
            let device = entry.item.device();
            registries.forget(&device.name);
            match self.destroy(device).await {
                Ok(()) => report.applications.push(device.name.clone()),
                Err(e) => {
                    warn!(application = %device.name, error = %e, "cleanup failed");
                    report.failures.push(e);
                }
            }
        }

        for entry in registries.devices.snapshot().iter() {
            let device = &entry.item;
            registries.forget(&device.name);
            match self.destroy(device).await {
                Ok(()) => report.devices.push(device.name.clone()),
                Err(e) => {
                    warn!(device = %device.name, error = %e, "cleanup failed");
                    report.failures.push(e);
                }
            }
        }

        for network in topology.into_iter().flat_map(Topology::networks) {
            let op = format!("destroy_network({})", network.name);
            match self
                .guard_uncancellable(op, self.controller.destroy_network(network))
                .await
            {
                Ok(()) => report.networks.push(network.name.clone()),
                Err(e) => {
                    warn!(network = %network.name, error = %e, "cleanup failed");
                    report.failures.push(e);
                }
            }
        }

        info!(
            applications = report.applications.len(),
            devices = report.devices.len(),
            networks = report.networks.len(),
            failures = report.failures.len(),
            "cleanup finished"
        );
        report
    }

    /// Destroy one unit, ignoring cancellation.
    pub(crate) async fn destroy(&self, device: &Device) -> Result<(), CoreError> {
        let op = format!("destroy_device({})", device.name);
        self.guard_uncancellable(op, self.controller.destroy_device(device))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::controller::sim::{Operation, SimController};
    use crate::model::Subnet;

    fn subnet(cidr: &str) -> Subnet {
        cidr.parse().unwrap()
    }

    fn orchestrator(sim: &Arc<SimController>, config: &HubConfig) -> Orchestrator {
        Orchestrator::new(
            Arc::clone(sim) as Arc<dyn Controller>,
            DeploySettings::from(config),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn build_context_devices_are_built_then_deployed() {
        let sim = Arc::new(SimController::new());
        let topo = Topology::builder()
            .network("lan1", subnet("10.0.0.0/24"))
            .device(
                Device::router("r1")
                    .with_build_context("./router")
                    .on_network("lan1"),
            )
            .build()
            .unwrap();
        let regs = Registries::default();
        orchestrator(&sim, &HubConfig::default())
            .deploy_topology(&topo, &regs)
            .await
            .unwrap();

        assert_eq!(regs.devices.get("r1").unwrap().tag, "netlab/r1:latest");
        assert_eq!(sim.count(Operation::BuildImage), 1);
    }

    #[tokio::test]
    async fn monitoring_switches_tag_deploys() {
        let sim = Arc::new(SimController::new());
        let topo = Topology::builder()
            .device(Device::router("r1"))
            .build()
            .unwrap();
        let config = HubConfig::default().with_monitoring(MonitoringEndpoint::new("10.9.9.9", 9200));
        let regs = Registries::default();
        orchestrator(&sim, &config)
            .deploy_topology(&topo, &regs)
            .await
            .unwrap();

        let env = sim.device_env("r1").unwrap();
        assert!(env.contains(&"MONITORING_PORT=9200".to_string()));
        assert_eq!(sim.device_tag("r1").unwrap(), config.router_tag);
    }

    #[tokio::test]
    async fn application_members_land_in_both_registries() {
        let sim = Arc::new(SimController::new());
        let mut app = Device::new("web", crate::model::DeviceKind::Application);
        app.networks.push("lan1".into());
        let topo = Topology::builder()
            .network("lan1", subnet("10.0.0.0/24"))
            .device(app)
            .build()
            .unwrap();
        let regs = Registries::default();
        orchestrator(&sim, &HubConfig::default())
            .deploy_topology(&topo, &regs)
            .await
            .unwrap();

        assert!(regs.devices.contains("web"));
        assert_eq!(regs.applications.get("web").unwrap().networks, ["lan1"]);
    }

    #[tokio::test]
    async fn failed_attach_destroys_the_single_device() {
        let sim = Arc::new(SimController::new());
        let lan = Network::new("lan1", subnet("10.0.0.0/24"));
        sim.create_network(&lan).await.unwrap();
        sim.fail_on(Operation::ConnectDevice, "app1");
        let regs = Registries::default();

        let err = orchestrator(&sim, &HubConfig::default())
            .deploy_device_to_network(
                Application::new("app1").device(),
                &lan,
                "app:1",
                &["A=1".to_string()],
                &regs,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Backend(BackendError::BackendUnavailable { .. })));
        assert!(!sim.has_device("app1"));
        assert!(regs.is_empty());
    }

    #[tokio::test]
    async fn cleanup_sweeps_everything_and_collects_failures() {
        let sim = Arc::new(SimController::new());
        let topo = Topology::builder()
            .network("lan1", subnet("10.0.0.0/24"))
            .network("lan2", subnet("10.0.1.0/24"))
            .device(Device::router("r1").on_network("lan1"))
            .device(Device::host("h1").on_network("lan2"))
            .build()
            .unwrap();
        let regs = Registries::default();
        let orch = orchestrator(&sim, &HubConfig::default());
        orch.deploy_topology(&topo, &regs).await.unwrap();

        sim.fail_on(Operation::DestroyDevice, "h1");
        let report = orch.cleanup(Some(&topo), &regs).await;

        assert_eq!(report.devices, ["r1"]);
        assert_eq!(report.networks, ["lan1"]);
        // h1 could not be destroyed, so lan2 stays busy
        assert_eq!(report.failures.len(), 2);
        assert!(regs.is_empty());
    }
}
