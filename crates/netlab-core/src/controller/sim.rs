// ── In-memory simulated backend ──
//
// A complete `Controller` that keeps all state in process. Addresses are
// allocated sequentially per subnet (gateway = host 1, devices from host 2),
// every call is logged, and faults can be injected per operation.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use strum::{Display, EnumString};
use tracing::debug;

use super::{
    BackendError, Controller, ExecOutput, MONITORING_ADDRESS_ENV, MONITORING_PORT_ENV,
};
use crate::config::MonitoringEndpoint;
use crate::model::{Device, Network, Subnet};

const IDENTIFIER: &str = "sim";

/// First host number handed to devices; host 1 is the gateway.
const FIRST_DEVICE_HOST: u32 = 2;

// ── Call log ─────────────────────────────────────────────────────────

/// Operation kinds, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    CreateNetwork,
    DestroyNetwork,
    BuildImage,
    DeployDevice,
    ConnectDevice,
    DisconnectDevice,
    StopDevice,
    StartDevice,
    DestroyDevice,
    ExecuteCommand,
    FindGateway,
}

/// One recorded controller call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControllerCall {
    CreateNetwork {
        network: String,
    },
    DestroyNetwork {
        network: String,
    },
    BuildImage {
        context: String,
        tag: String,
    },
    DeployDevice {
        device: String,
        tag: String,
        monitoring: Option<String>,
    },
    ConnectDevice {
        device: String,
        network: String,
    },
    DisconnectDevice {
        device: String,
        network: String,
    },
    StopDevice {
        device: String,
    },
    StartDevice {
        device: String,
    },
    DestroyDevice {
        device: String,
    },
    ExecuteCommand {
        device: String,
        command: String,
    },
    FindGateway {
        device: String,
    },
}

impl ControllerCall {
    pub fn operation(&self) -> Operation {
        match self {
            Self::CreateNetwork { .. } => Operation::CreateNetwork,
            Self::DestroyNetwork { .. } => Operation::DestroyNetwork,
            Self::BuildImage { .. } => Operation::BuildImage,
            Self::DeployDevice { .. } => Operation::DeployDevice,
            Self::ConnectDevice { .. } => Operation::ConnectDevice,
            Self::DisconnectDevice { .. } => Operation::DisconnectDevice,
            Self::StopDevice { .. } => Operation::StopDevice,
            Self::StartDevice { .. } => Operation::StartDevice,
            Self::DestroyDevice { .. } => Operation::DestroyDevice,
            Self::ExecuteCommand { .. } => Operation::ExecuteCommand,
            Self::FindGateway { .. } => Operation::FindGateway,
        }
    }

    /// Names a fault can be keyed on: the device and/or network, or the tag
    /// for image builds.
    pub fn subjects(&self) -> Vec<&str> {
        match self {
            Self::CreateNetwork { network } | Self::DestroyNetwork { network } => {
                vec![network.as_str()]
            }
            Self::BuildImage { tag, .. } => vec![tag.as_str()],
            Self::ConnectDevice { device, network } | Self::DisconnectDevice { device, network } => {
                vec![device.as_str(), network.as_str()]
            }
            Self::DeployDevice { device, .. }
            | Self::StopDevice { device }
            | Self::StartDevice { device }
            | Self::DestroyDevice { device }
            | Self::ExecuteCommand { device, .. }
            | Self::FindGateway { device } => vec![device.as_str()],
        }
    }

    /// The primary subject, for compact display.
    pub fn subject(&self) -> &str {
        self.subjects().first().copied().unwrap_or_default()
    }
}

impl fmt::Display for ControllerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateNetwork { network } => write!(f, "create_network({network})"),
            Self::DestroyNetwork { network } => write!(f, "destroy_network({network})"),
            Self::BuildImage { context, tag } => write!(f, "build_image({context}, {tag})"),
            Self::DeployDevice {
                device,
                tag,
                monitoring: Some(sink),
            } => write!(f, "deploy_device({device}, {tag}, {sink})"),
            Self::DeployDevice {
                device,
                tag,
                monitoring: None,
            } => write!(f, "deploy_device({device}, {tag})"),
            Self::ConnectDevice { device, network } => {
                write!(f, "connect_device_to_network({device}, {network})")
            }
            Self::DisconnectDevice { device, network } => {
                write!(f, "disconnect_device({device}, {network})")
            }
            Self::StopDevice { device } => write!(f, "stop_device({device})"),
            Self::StartDevice { device } => write!(f, "start_device({device})"),
            Self::DestroyDevice { device } => write!(f, "destroy_device({device})"),
            Self::ExecuteCommand { device, command } => {
                write!(f, "execute_command({device}, {command:?})")
            }
            Self::FindGateway { device } => write!(f, "find_gateway({device})"),
        }
    }
}

// ── State ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SimNetwork {
    subnet: Subnet,
    next_host: u32,
}

#[derive(Debug)]
struct SimDevice {
    tag: String,
    env: Vec<String>,
    running: bool,
    /// Attachments in connect order; the first is the gateway network.
    attachments: Vec<(String, Ipv4Addr)>,
}

#[derive(Debug)]
struct Fault {
    operation: Operation,
    subject: String,
}

#[derive(Debug)]
struct Delay {
    operation: Operation,
    subject: String,
    delay: Duration,
}

#[derive(Debug, Default)]
struct SimState {
    unavailable: bool,
    latency: Duration,
    networks: HashMap<String, SimNetwork>,
    devices: HashMap<String, SimDevice>,
    images: HashSet<String>,
    missing_images: HashSet<String>,
    faults: Vec<Fault>,
    delays: Vec<Delay>,
    calls: Vec<ControllerCall>,
}

impl SimState {
    /// Log the call, then apply availability and injected faults.
    fn record(&mut self, call: ControllerCall) -> Result<(), BackendError> {
        debug!(backend = IDENTIFIER, %call, "controller call");
        let op = call.operation();
        let fault = self.faults.iter().position(|f| {
            f.operation == op && call.subjects().iter().any(|s| *s == f.subject)
        });
        let subject = call.subject().to_owned();
        self.calls.push(call);

        if self.unavailable {
            return Err(unavailable("backend marked unavailable"));
        }
        if let Some(idx) = fault {
            let fault = self.faults.remove(idx);
            return Err(injected(fault.operation, &subject));
        }
        Ok(())
    }

    fn device(&self, name: &str) -> Result<&SimDevice, BackendError> {
        self.devices
            .get(name)
            .ok_or_else(|| BackendError::DeviceNotFound {
                device: name.to_owned(),
            })
    }

    fn device_mut(&mut self, name: &str) -> Result<&mut SimDevice, BackendError> {
        self.devices
            .get_mut(name)
            .ok_or_else(|| BackendError::DeviceNotFound {
                device: name.to_owned(),
            })
    }

    /// The subnet of the device's first attachment.
    fn gateway_subnet(&self, device: &str) -> Result<Subnet, BackendError> {
        let dev = self.device(device)?;
        dev.attachments
            .first()
            .and_then(|(net, _)| self.networks.get(net))
            .map(|n| n.subnet)
            .ok_or_else(|| BackendError::AddressNotResolved {
                device: device.to_owned(),
            })
    }

    fn deploy(
        &mut self,
        device: &Device,
        tag: &str,
        monitoring: Option<&MonitoringEndpoint>,
    ) -> Result<(), BackendError> {
        self.record(ControllerCall::DeployDevice {
            device: device.name.clone(),
            tag: tag.to_owned(),
            monitoring: monitoring.map(ToString::to_string),
        })?;
        if self.missing_images.contains(tag) {
            return Err(BackendError::ImageNotFound {
                tag: tag.to_owned(),
            });
        }
        if self.devices.contains_key(&device.name) {
            return Err(BackendError::DeployFailed {
                device: device.name.clone(),
                reason: "a unit with this name already exists".into(),
            });
        }

        let mut env = device.env.clone();
        if let Some(sink) = monitoring {
            env.push(format!("{MONITORING_ADDRESS_ENV}={}", sink.address));
            env.push(format!("{MONITORING_PORT_ENV}={}", sink.port));
        }
        self.devices.insert(
            device.name.clone(),
            SimDevice {
                tag: tag.to_owned(),
                env,
                running: true,
                attachments: Vec::new(),
            },
        );
        Ok(())
    }
}

fn unavailable(reason: &str) -> BackendError {
    BackendError::BackendUnavailable {
        backend: IDENTIFIER.into(),
        reason: reason.into(),
    }
}

/// The error an injected fault surfaces as for each operation.
fn injected(op: Operation, subject: &str) -> BackendError {
    let reason = String::from("injected fault");
    match op {
        Operation::CreateNetwork
        | Operation::DestroyNetwork
        | Operation::ConnectDevice
        | Operation::DestroyDevice => unavailable(&reason),
        Operation::BuildImage => BackendError::BuildFailed {
            path: subject.into(),
            reason,
        },
        Operation::DeployDevice => BackendError::DeployFailed {
            device: subject.to_owned(),
            reason,
        },
        Operation::DisconnectDevice => BackendError::NotConnected {
            device: subject.to_owned(),
            network: String::new(),
        },
        Operation::StopDevice | Operation::StartDevice => BackendError::DeviceNotFound {
            device: subject.to_owned(),
        },
        Operation::ExecuteCommand => BackendError::ExecFailed {
            device: subject.to_owned(),
            reason,
        },
        Operation::FindGateway => BackendError::AddressNotResolved {
            device: subject.to_owned(),
        },
    }
}

// ── SimController ────────────────────────────────────────────────────

/// In-memory backend for tests and dry runs.
///
/// All inspection and fault-injection methods take `&self` so the
/// controller can be shared as `Arc<SimController>` with a hub while the
/// test keeps a handle.
#[derive(Debug, Default)]
pub struct SimController {
    state: Mutex<SimState>,
}

impl SimController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `deploy_device` with this tag fail with `ImageNotFound`.
    pub fn with_missing_image(self, tag: impl Into<String>) -> Self {
        self.state().missing_images.insert(tag.into());
        self
    }

    /// Register a backend network the model does not know about, so that
    /// creating a same-named network conflicts.
    pub fn with_foreign_network(self, name: impl Into<String>, subnet: Subnet) -> Self {
        self.state().networks.insert(
            name.into(),
            SimNetwork {
                subnet,
                next_host: FIRST_DEVICE_HOST,
            },
        );
        self
    }

    /// Fail the next call of `operation` whose device, network or tag is
    /// `subject`. Faults are consumed once.
    pub fn fail_on(&self, operation: Operation, subject: impl Into<String>) {
        self.state().faults.push(Fault {
            operation,
            subject: subject.into(),
        });
    }

    /// Delay the next call of `operation` whose device, network or tag is
    /// `subject` by `delay`. The call is only logged once the delay has
    /// passed.
    pub fn slow_on(&self, operation: Operation, subject: impl Into<String>, delay: Duration) {
        self.state().delays.push(Delay {
            operation,
            subject: subject.into(),
            delay,
        });
    }

    /// Make every call fail with `BackendUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Delay every call by `latency` before it touches any state.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.state().networks.contains_key(name)
    }

    pub fn has_device(&self, name: &str) -> bool {
        self.state().devices.contains_key(name)
    }

    pub fn network_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state().networks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state().devices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_running(&self, device: &str) -> Option<bool> {
        self.state().devices.get(device).map(|d| d.running)
    }

    pub fn device_tag(&self, device: &str) -> Option<String> {
        self.state().devices.get(device).map(|d| d.tag.clone())
    }

    pub fn device_env(&self, device: &str) -> Option<Vec<String>> {
        self.state().devices.get(device).map(|d| d.env.clone())
    }

    /// Address assigned to `device` on `network`, if attached.
    pub fn device_address(&self, device: &str, network: &str) -> Option<Ipv4Addr> {
        self.state().devices.get(device).and_then(|d| {
            d.attachments
                .iter()
                .find(|(n, _)| n == network)
                .map(|(_, addr)| *addr)
        })
    }

    /// Network names `device` is attached to, in connect order.
    pub fn attachments(&self, device: &str) -> Vec<String> {
        self.state()
            .devices
            .get(device)
            .map(|d| d.attachments.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_image(&self, tag: &str) -> bool {
        self.state().images.contains(tag)
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply configured latency plus any delay keyed on one of `subjects`,
    /// matched the way faults are. The lock is never held across this await.
    async fn pause(&self, operation: Operation, subjects: &[&str]) {
        let delay = {
            let mut st = self.state();
            let slow = st
                .delays
                .iter()
                .position(|d| d.operation == operation && subjects.contains(&d.subject.as_str()))
                .map_or(Duration::ZERO, |idx| st.delays.remove(idx).delay);
            st.latency + slow
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Controller for SimController {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    async fn create_network(&self, network: &Network) -> Result<(), BackendError> {
        self.pause(Operation::CreateNetwork, &[network.name.as_str()]).await;
        let mut st = self.state();
        st.record(ControllerCall::CreateNetwork {
            network: network.name.clone(),
        })?;
        if st.networks.contains_key(&network.name) {
            return Err(BackendError::NetworkConflict {
                network: network.name.clone(),
            });
        }
        st.networks.insert(
            network.name.clone(),
            SimNetwork {
                subnet: network.subnet,
                next_host: FIRST_DEVICE_HOST,
            },
        );
        Ok(())
    }

    async fn destroy_network(&self, network: &Network) -> Result<(), BackendError> {
        self.pause(Operation::DestroyNetwork, &[network.name.as_str()]).await;
        let mut st = self.state();
        st.record(ControllerCall::DestroyNetwork {
            network: network.name.clone(),
        })?;
        if !st.networks.contains_key(&network.name) {
            return Err(BackendError::NetworkNotFound {
                network: network.name.clone(),
            });
        }
        let mut attached: Vec<String> = st
            .devices
            .iter()
            .filter(|(_, d)| d.attachments.iter().any(|(n, _)| *n == network.name))
            .map(|(name, _)| name.clone())
            .collect();
        if !attached.is_empty() {
            attached.sort();
            return Err(BackendError::NetworkBusy {
                network: network.name.clone(),
                attached,
            });
        }
        st.networks.remove(&network.name);
        Ok(())
    }

    async fn build_image(&self, context: &Path, tag: &str) -> Result<(), BackendError> {
        self.pause(Operation::BuildImage, &[tag]).await;
        let mut st = self.state();
        st.record(ControllerCall::BuildImage {
            context: context.display().to_string(),
            tag: tag.to_owned(),
        })?;
        st.missing_images.remove(tag);
        st.images.insert(tag.to_owned());
        Ok(())
    }

    async fn deploy_device(&self, device: &Device, tag: &str) -> Result<(), BackendError> {
        self.pause(Operation::DeployDevice, &[device.name.as_str()]).await;
        self.state().deploy(device, tag, None)
    }

    async fn deploy_device_with_monitoring(
        &self,
        device: &Device,
        tag: &str,
        monitoring: &MonitoringEndpoint,
    ) -> Result<(), BackendError> {
        self.pause(Operation::DeployDevice, &[device.name.as_str()]).await;
        self.state().deploy(device, tag, Some(monitoring))
    }

    async fn connect_device_to_network(
        &self,
        device: &Device,
        network: &Network,
    ) -> Result<(), BackendError> {
        self.pause(
            Operation::ConnectDevice,
            &[device.name.as_str(), network.name.as_str()],
        )
        .await;
        let mut st = self.state();
        st.record(ControllerCall::ConnectDevice {
            device: device.name.clone(),
            network: network.name.clone(),
        })?;
        if st
            .device(&device.name)?
            .attachments
            .iter()
            .any(|(n, _)| *n == network.name)
        {
            return Err(BackendError::AlreadyConnected {
                device: device.name.clone(),
                network: network.name.clone(),
            });
        }
        let net = st
            .networks
            .get_mut(&network.name)
            .ok_or_else(|| BackendError::NetworkNotFound {
                network: network.name.clone(),
            })?;
        let address = net
            .subnet
            .host(net.next_host)
            .ok_or_else(|| BackendError::DeployFailed {
                device: device.name.clone(),
                reason: format!("no free address left in {}", net.subnet),
            })?;
        net.next_host += 1;
        st.device_mut(&device.name)?
            .attachments
            .push((network.name.clone(), address));
        Ok(())
    }

    async fn disconnect_device(
        &self,
        device: &Device,
        network: &Network,
    ) -> Result<(), BackendError> {
        self.pause(
            Operation::DisconnectDevice,
            &[device.name.as_str(), network.name.as_str()],
        )
        .await;
        let mut st = self.state();
        st.record(ControllerCall::DisconnectDevice {
            device: device.name.clone(),
            network: network.name.clone(),
        })?;
        let dev = st.device_mut(&device.name)?;
        let before = dev.attachments.len();
        dev.attachments.retain(|(n, _)| *n != network.name);
        if dev.attachments.len() == before {
            return Err(BackendError::NotConnected {
                device: device.name.clone(),
                network: network.name.clone(),
            });
        }
        Ok(())
    }

    async fn stop_device(&self, device: &Device) -> Result<(), BackendError> {
        self.pause(Operation::StopDevice, &[device.name.as_str()]).await;
        let mut st = self.state();
        st.record(ControllerCall::StopDevice {
            device: device.name.clone(),
        })?;
        st.device_mut(&device.name)?.running = false;
        Ok(())
    }

    async fn start_device(&self, device: &Device) -> Result<(), BackendError> {
        self.pause(Operation::StartDevice, &[device.name.as_str()]).await;
        let mut st = self.state();
        st.record(ControllerCall::StartDevice {
            device: device.name.clone(),
        })?;
        st.device_mut(&device.name)?.running = true;
        Ok(())
    }

    async fn destroy_device(&self, device: &Device) -> Result<(), BackendError> {
        self.pause(Operation::DestroyDevice, &[device.name.as_str()]).await;
        let mut st = self.state();
        st.record(ControllerCall::DestroyDevice {
            device: device.name.clone(),
        })?;
        // stop, then remove; removal detaches from every network
        st.device_mut(&device.name)?.running = false;
        st.devices.remove(&device.name);
        Ok(())
    }

    async fn execute_command(
        &self,
        device: &Device,
        command: &str,
    ) -> Result<ExecOutput, BackendError> {
        self.pause(Operation::ExecuteCommand, &[device.name.as_str()]).await;
        let mut st = self.state();
        st.record(ControllerCall::ExecuteCommand {
            device: device.name.clone(),
            command: command.to_owned(),
        })?;
        let dev = st.device(&device.name).map_err(|_| BackendError::ExecFailed {
            device: device.name.clone(),
            reason: "device does not exist".into(),
        })?;
        if !dev.running {
            return Err(BackendError::ExecFailed {
                device: device.name.clone(),
                reason: "device is not running".into(),
            });
        }
        Ok(ExecOutput {
            exit_code: 0,
            stdout: format!("{command}\n"),
            stderr: String::new(),
        })
    }

    async fn find_gw_network_address(&self, device: &Device) -> Result<Ipv4Addr, BackendError> {
        self.pause(Operation::FindGateway, &[device.name.as_str()]).await;
        let mut st = self.state();
        st.record(ControllerCall::FindGateway {
            device: device.name.clone(),
        })?;
        Ok(st.gateway_subnet(&device.name)?.network_address())
    }

    async fn find_gw_address(&self, device: &Device) -> Result<Ipv4Addr, BackendError> {
        self.pause(Operation::FindGateway, &[device.name.as_str()]).await;
        let mut st = self.state();
        st.record(ControllerCall::FindGateway {
            device: device.name.clone(),
        })?;
        Ok(st.gateway_subnet(&device.name)?.gateway())
    }

    async fn find_gw_mask(&self, device: &Device) -> Result<u8, BackendError> {
        self.pause(Operation::FindGateway, &[device.name.as_str()]).await;
        let mut st = self.state();
        st.record(ControllerCall::FindGateway {
            device: device.name.clone(),
        })?;
        Ok(st.gateway_subnet(&device.name)?.prefix_len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn lan(name: &str, cidr: &str) -> Network {
        Network::new(name, cidr.parse().unwrap())
    }

    #[tokio::test]
    async fn addresses_are_allocated_sequentially_after_gateway() {
        let sim = SimController::new();
        let net = lan("lan1", "10.0.0.0/24");
        let r1 = Device::router("r1");
        let h1 = Device::host("h1");

        sim.create_network(&net).await.unwrap();
        sim.deploy_device(&r1, "img").await.unwrap();
        sim.deploy_device(&h1, "img").await.unwrap();
        sim.connect_device_to_network(&r1, &net).await.unwrap();
        sim.connect_device_to_network(&h1, &net).await.unwrap();

        assert_eq!(sim.device_address("r1", "lan1"), Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(sim.device_address("h1", "lan1"), Some(Ipv4Addr::new(10, 0, 0, 3)));
        assert_eq!(
            sim.find_gw_address(&h1).await.unwrap(),
            Ipv4Addr::new(10, 0, 0, 1)
        );
        assert_eq!(
            sim.find_gw_network_address(&h1).await.unwrap(),
            Ipv4Addr::new(10, 0, 0, 0)
        );
        assert_eq!(sim.find_gw_mask(&h1).await.unwrap(), 24);
    }

    #[tokio::test]
    async fn gateway_discovery_needs_an_attachment() {
        let sim = SimController::new();
        let r1 = Device::router("r1");
        sim.deploy_device(&r1, "img").await.unwrap();
        assert!(matches!(
            sim.find_gw_address(&r1).await,
            Err(BackendError::AddressNotResolved { .. })
        ));
    }

    #[tokio::test]
    async fn destroy_network_refuses_while_devices_attached() {
        let sim = SimController::new();
        let net = lan("lan1", "10.0.0.0/24");
        let r1 = Device::router("r1");
        sim.create_network(&net).await.unwrap();
        sim.deploy_device(&r1, "img").await.unwrap();
        sim.connect_device_to_network(&r1, &net).await.unwrap();

        let err = sim.destroy_network(&net).await.unwrap_err();
        assert!(matches!(err, BackendError::NetworkBusy { ref attached, .. } if attached == &["r1"]));

        sim.disconnect_device(&r1, &net).await.unwrap();
        sim.destroy_network(&net).await.unwrap();
        assert!(!sim.has_network("lan1"));
    }

    #[tokio::test]
    async fn disconnect_requires_attachment() {
        let sim = SimController::new();
        let net = lan("lan1", "10.0.0.0/24");
        let r1 = Device::router("r1");
        sim.create_network(&net).await.unwrap();
        sim.deploy_device(&r1, "img").await.unwrap();
        assert!(matches!(
            sim.disconnect_device(&r1, &net).await,
            Err(BackendError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn destroy_tolerates_stopped_device() {
        let sim = SimController::new();
        let r1 = Device::router("r1");
        sim.deploy_device(&r1, "img").await.unwrap();
        sim.stop_device(&r1).await.unwrap();
        assert_eq!(sim.is_running("r1"), Some(false));
        sim.destroy_device(&r1).await.unwrap();
        assert!(!sim.has_device("r1"));
        assert!(matches!(
            sim.destroy_device(&r1).await,
            Err(BackendError::DeviceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn exec_requires_running_device() {
        let sim = SimController::new();
        let r1 = Device::router("r1");
        sim.deploy_device(&r1, "img").await.unwrap();
        let out = sim.execute_command(&r1, "ip route").await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "ip route\n");

        sim.stop_device(&r1).await.unwrap();
        assert!(matches!(
            sim.execute_command(&r1, "ip route").await,
            Err(BackendError::ExecFailed { .. })
        ));
        sim.start_device(&r1).await.unwrap();
        assert!(sim.execute_command(&r1, "true").await.is_ok());
    }

    #[tokio::test]
    async fn monitoring_endpoint_lands_in_environment() {
        let sim = SimController::new();
        let r1 = Device::router("r1").with_env("ROLE=edge");
        let sink = MonitoringEndpoint::new("10.9.9.9", 9200);
        sim.deploy_device_with_monitoring(&r1, "img", &sink)
            .await
            .unwrap();
        assert_eq!(
            sim.device_env("r1").unwrap(),
            vec![
                "ROLE=edge".to_string(),
                "MONITORING_ADDRESS=10.9.9.9".to_string(),
                "MONITORING_PORT=9200".to_string(),
            ]
        );
        assert_eq!(
            sim.calls().last().unwrap().to_string(),
            "deploy_device(r1, img, 10.9.9.9:9200)"
        );
    }

    #[tokio::test]
    async fn deploy_from_file_builds_then_deploys() {
        let sim = SimController::new();
        let r1 = Device::router("R1");
        sim.deploy_device_from_file(&r1, Path::new("./router"))
            .await
            .unwrap();
        assert!(sim.has_image("netlab/r1:latest"));
        assert_eq!(sim.device_tag("R1").as_deref(), Some("netlab/r1:latest"));
        let ops: Vec<_> = sim.calls().iter().map(ControllerCall::operation).collect();
        assert_eq!(ops, [Operation::BuildImage, Operation::DeployDevice]);
    }

    #[tokio::test]
    async fn missing_image_and_foreign_network_are_reported() {
        let sim = SimController::new()
            .with_missing_image("ghost:1")
            .with_foreign_network("lan1", "10.0.0.0/24".parse().unwrap());
        assert!(matches!(
            sim.deploy_device(&Device::router("r1"), "ghost:1").await,
            Err(BackendError::ImageNotFound { .. })
        ));
        assert!(matches!(
            sim.create_network(&lan("lan1", "10.0.0.0/24")).await,
            Err(BackendError::NetworkConflict { .. })
        ));
    }

    #[tokio::test]
    async fn multi_connect_undoes_partial_attachment() {
        let sim = SimController::new();
        let a = lan("a", "10.0.0.0/24");
        let b = lan("b", "10.0.1.0/24");
        let c = lan("c", "10.0.2.0/24");
        let r1 = Device::router("r1");
        for n in [&a, &b, &c] {
            sim.create_network(n).await.unwrap();
        }
        sim.deploy_device(&r1, "img").await.unwrap();
        sim.fail_on(Operation::ConnectDevice, "c");

        let err = sim
            .connect_device_to_networks(&r1, &[&a, &b, &c])
            .await
            .unwrap_err();
        match err {
            BackendError::PartialConnect {
                network, attached, ..
            } => {
                assert_eq!(network, "c");
                assert_eq!(attached, ["a", "b"]);
            }
            other => panic!("expected PartialConnect, got {other:?}"),
        }
        assert!(sim.attachments("r1").is_empty());
    }

    #[tokio::test]
    async fn faults_fire_once_and_unavailability_is_global() {
        let sim = SimController::new();
        let r1 = Device::router("r1");
        sim.fail_on(Operation::DeployDevice, "r1");
        assert!(matches!(
            sim.deploy_device(&r1, "img").await,
            Err(BackendError::DeployFailed { .. })
        ));
        sim.deploy_device(&r1, "img").await.unwrap();

        sim.set_unavailable(true);
        let err = sim.stop_device(&r1).await.unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(sim.count(Operation::DeployDevice), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_match_device_or_network() {
        let sim = SimController::new();
        let net = lan("lan1", "10.0.0.0/24");
        let r1 = Device::router("r1");
        sim.create_network(&net).await.unwrap();
        sim.deploy_device(&r1, "img").await.unwrap();

        sim.slow_on(Operation::ConnectDevice, "r1", Duration::from_secs(30));
        let slow = tokio::time::timeout(
            Duration::from_secs(1),
            sim.connect_device_to_network(&r1, &net),
        )
        .await;
        assert!(slow.is_err(), "delay keyed on the device must fire");
        assert_eq!(sim.count(Operation::ConnectDevice), 0);

        sim.connect_device_to_network(&r1, &net).await.unwrap();
        assert_eq!(sim.attachments("r1"), ["lan1"]);
    }
}
