// ── Device domain types ──

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Role a device plays in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    Router,
    Host,
    Application,
}

/// Device lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceState {
    Pending,
    Deployed,
    Destroyed,
}

/// Where a device's image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// Pre-built image reference, e.g. `netlab/router:latest`.
    Tag(String),
    /// Local build context; the image is built before deployment.
    BuildContext(PathBuf),
}

/// A unit of compute realized as one backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub kind: DeviceKind,
    /// `None` means "use the hub's default router image".
    pub image: Option<ImageSource>,
    /// `KEY=VALUE` entries passed to the backend unit.
    #[serde(default)]
    pub env: Vec<String>,
    /// Network names in connection order. The first one is the default
    /// gateway network.
    #[serde(default)]
    pub networks: Vec<String>,
}

impl Device {
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            image: None,
            env: Vec::new(),
            networks: Vec::new(),
        }
    }

    pub fn router(name: impl Into<String>) -> Self {
        Self::new(name, DeviceKind::Router)
    }

    pub fn host(name: impl Into<String>) -> Self {
        Self::new(name, DeviceKind::Host)
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.image = Some(ImageSource::Tag(tag.into()));
        self
    }

    pub fn with_build_context(mut self, path: impl Into<PathBuf>) -> Self {
        self.image = Some(ImageSource::BuildContext(path.into()));
        self
    }

    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn on_network(mut self, network: impl Into<String>) -> Self {
        self.networks.push(network.into());
        self
    }

    pub fn is_application(&self) -> bool {
        self.kind == DeviceKind::Application
    }
}

/// A workload container attached to exactly one network at deploy time.
///
/// Thin wrapper over [`Device`] with `kind == Application`; the network is
/// chosen when it is deployed through the hub, not when it is declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Application {
    device: Device,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            device: Device::new(name, DeviceKind::Application),
        }
    }

    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.device.env.push(entry.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.device.name
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn into_device(self) -> Device {
        self.device
    }

    /// Wrap a topology device, forcing its kind to `Application`.
    pub fn from_device(mut device: Device) -> Self {
        device.kind = DeviceKind::Application;
        Self { device }
    }
}
