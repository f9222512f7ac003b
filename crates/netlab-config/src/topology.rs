// ── Topology files ──
//
// TOML declaration of networks and devices. Parsing only checks shape;
// name uniqueness is enforced by `TopologyBuilder`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use netlab_core::{Device, DeviceKind, Subnet, Topology};

use crate::ConfigError;

/// On-disk layout of a topology file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyFile {
    #[serde(default)]
    pub networks: Vec<NetworkSpec>,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    pub name: String,
    /// CIDR, e.g. "10.0.0.0/24".
    pub subnet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSpec {
    pub name: String,
    pub kind: DeviceKind,
    /// Pre-built image tag. Mutually exclusive with `build`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Build context directory, relative to the topology file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<PathBuf>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
}

impl TopologyFile {
    /// Validate and build the topology. Relative build contexts are
    /// resolved against `base_dir` when given.
    pub fn into_topology(self, base_dir: Option<&Path>) -> Result<Topology, ConfigError> {
        let mut builder = Topology::builder();

        for net in self.networks {
            let subnet: Subnet =
                net.subnet
                    .parse()
                    .map_err(|source| ConfigError::InvalidSubnet {
                        network: net.name.clone(),
                        value: net.subnet.clone(),
                        source,
                    })?;
            builder = builder.network(net.name, subnet);
        }

        for spec in self.devices {
            builder = builder.device(spec.into_device(base_dir)?);
        }

        builder.build().map_err(ConfigError::from)
    }
}

impl DeviceSpec {
    fn into_device(self, base_dir: Option<&Path>) -> Result<Device, ConfigError> {
        let mut device = Device::new(self.name, self.kind);
        device = match (self.image, self.build) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Validation {
                    field: format!("devices.{}", device.name),
                    reason: "'image' and 'build' are mutually exclusive".into(),
                });
            }
            (Some(tag), None) => device.with_tag(tag),
            (None, Some(context)) => match base_dir {
                Some(base) if context.is_relative() => device.with_build_context(base.join(context)),
                _ => device.with_build_context(context),
            },
            (None, None) => device,
        };
        device.env = self.env;
        device.networks = self.networks;
        Ok(device)
    }
}

/// Parse a topology from TOML text. Build contexts stay as written.
pub fn parse_topology(input: &str) -> Result<Topology, ConfigError> {
    let file: TopologyFile = toml::from_str(input)?;
    file.into_topology(None)
}

/// Read and parse a topology file.
pub fn load_topology(path: &Path) -> Result<Topology, ConfigError> {
    let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: TopologyFile = toml::from_str(&input)?;
    file.into_topology(path.parent())
}
