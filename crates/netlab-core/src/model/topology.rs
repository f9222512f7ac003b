// ── Topology ──
//
// The declared end state: networks keyed by name plus the devices that
// join them. Built once through `TopologyBuilder`, read-only afterwards.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;

use super::device::Device;
use super::network::Network;
use super::subnet::Subnet;
use crate::error::CoreError;

/// An immutable graph of networks and devices.
#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    networks: IndexMap<String, Network>,
    devices: Vec<Device>,
}

/// A device network reference that does not resolve inside its topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingReference {
    pub device: String,
    pub network: String,
}

impl Topology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.get(name)
    }

    pub fn has_network(&self, name: &str) -> bool {
        self.networks.contains_key(name)
    }

    /// Networks in declaration order.
    pub fn networks(&self) -> impl ExactSizeIterator<Item = &Network> {
        self.networks.values()
    }

    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Devices in declaration order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Split a device's network references into the ones this topology
    /// knows and the ones it does not, preserving order.
    pub fn resolve_networks<'a>(&'a self, device: &'a Device) -> (Vec<&'a Network>, Vec<&'a str>) {
        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        for name in &device.networks {
            match self.networks.get(name) {
                Some(net) => resolved.push(net),
                None => missing.push(name.as_str()),
            }
        }
        (resolved, missing)
    }

    /// Every device reference to a network absent from this topology.
    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        self.devices
            .iter()
            .flat_map(|d| {
                d.networks
                    .iter()
                    .filter(|n| !self.networks.contains_key(n.as_str()))
                    .map(|n| DanglingReference {
                        device: d.name.clone(),
                        network: n.clone(),
                    })
            })
            .collect()
    }
}

/// Accumulates networks and devices, validating names on [`build`](Self::build).
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    networks: Vec<Network>,
    devices: Vec<Device>,
}

impl TopologyBuilder {
    pub fn network(mut self, name: impl Into<String>, subnet: Subnet) -> Self {
        self.networks.push(Network::new(name, subnet));
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.devices.push(device);
        self
    }

    pub fn build(self) -> Result<Topology, CoreError> {
        let mut networks: IndexMap<String, Network> = IndexMap::with_capacity(self.networks.len());
        for net in self.networks {
            if networks.contains_key(&net.name) {
                return Err(CoreError::DuplicateNetwork { name: net.name });
            }
            networks.insert(net.name.clone(), net);
        }

        let mut devices = self.devices;
        let mut seen = HashSet::with_capacity(devices.len());
        for device in &mut devices {
            if !seen.insert(device.name.clone()) {
                return Err(CoreError::DuplicateDevice {
                    name: device.name.clone(),
                });
            }

            // Repeated references collapse onto the first one.
            let mut refs = HashSet::with_capacity(device.networks.len());
            device.networks.retain(|n| refs.insert(n.clone()));

            if device.is_application() && device.networks.len() != 1 {
                return Err(CoreError::Validation {
                    message: format!(
                        "application '{}' must join exactly one network, found {}",
                        device.name,
                        device.networks.len()
                    ),
                });
            }

            for net_name in &device.networks {
                if let Some(net) = networks.get_mut(net_name) {
                    net.members.insert(device.name.clone());
                }
            }
        }

        Ok(Topology { networks, devices })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::DeviceKind;

    fn subnet(s: &str) -> Subnet {
        s.parse().unwrap()
    }

    #[test]
    fn build_fills_network_members() {
        let topo = Topology::builder()
            .network("lan1", subnet("10.0.0.0/24"))
            .network("lan2", subnet("10.0.1.0/24"))
            .device(Device::router("r1").on_network("lan1").on_network("lan2"))
            .device(Device::host("h1").on_network("lan2"))
            .build()
            .unwrap();

        assert_eq!(topo.network_count(), 2);
        assert!(topo.network("lan1").unwrap().has_member("r1"));
        assert!(!topo.network("lan1").unwrap().has_member("h1"));
        assert_eq!(topo.network("lan2").unwrap().members.len(), 2);
        let names: Vec<_> = topo.networks().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["lan1", "lan2"]);
    }

    #[test]
    fn duplicate_network_is_rejected() {
        let err = Topology::builder()
            .network("lan1", subnet("10.0.0.0/24"))
            .network("lan1", subnet("10.0.1.0/24"))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateNetwork { ref name } if name == "lan1"));
    }

    #[test]
    fn duplicate_device_is_rejected() {
        let err = Topology::builder()
            .device(Device::router("r1"))
            .device(Device::host("r1"))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateDevice { ref name } if name == "r1"));
    }

    #[test]
    fn unknown_references_survive_build_and_are_reported() {
        let topo = Topology::builder()
            .network("lan1", subnet("10.0.0.0/24"))
            .device(Device::router("r1").on_network("lan1").on_network("ghost"))
            .build()
            .unwrap();

        let device = topo.device("r1").unwrap();
        let (resolved, missing) = topo.resolve_networks(device);
        assert_eq!(resolved.len(), 1);
        assert_eq!(missing, ["ghost"]);
        assert_eq!(
            topo.dangling_references(),
            vec![DanglingReference {
                device: "r1".into(),
                network: "ghost".into(),
            }]
        );
    }

    #[test]
    fn repeated_network_reference_collapses() {
        let topo = Topology::builder()
            .network("lan1", subnet("10.0.0.0/24"))
            .network("lan2", subnet("10.0.1.0/24"))
            .device(
                Device::router("r1")
                    .on_network("lan1")
                    .on_network("lan2")
                    .on_network("lan1"),
            )
            .build()
            .unwrap();

        assert_eq!(topo.device("r1").unwrap().networks, ["lan1", "lan2"]);
        assert_eq!(topo.network("lan1").unwrap().members.len(), 1);
    }

    #[test]
    fn application_needs_exactly_one_network() {
        let mut two = Device::new("web", DeviceKind::Application);
        two.networks = vec!["lan1".into(), "lan2".into()];
        let err = Topology::builder()
            .network("lan1", subnet("10.0.0.0/24"))
            .network("lan2", subnet("10.0.1.0/24"))
            .device(two)
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { ref message } if message.contains("'web'")));

        let none = Device::new("web", DeviceKind::Application);
        assert!(matches!(
            Topology::builder().device(none).build(),
            Err(CoreError::Validation { .. })
        ));

        let mut repeated = Device::new("web", DeviceKind::Application);
        repeated.networks = vec!["lan1".into(), "lan1".into()];
        let topo = Topology::builder()
            .network("lan1", subnet("10.0.0.0/24"))
            .device(repeated)
            .build()
            .unwrap();
        assert_eq!(topo.device("web").unwrap().networks, ["lan1"]);
    }
}
