// ── Deployed entity registries ──

mod collection;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;
use crate::model::{Application, Device};

pub use collection::Registry;

/// A deployed entity plus what the backend did with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry<T> {
    pub item: T,
    /// Networks the entity was attached to, in connect order.
    pub networks: Vec<String>,
    /// Image tag it was deployed from.
    pub tag: String,
    pub deployed_at: DateTime<Utc>,
}

impl<T> Entry<T> {
    pub fn new(item: T, networks: Vec<String>, tag: impl Into<String>) -> Self {
        Self {
            item,
            networks,
            tag: tag.into(),
            deployed_at: Utc::now(),
        }
    }
}

pub type DeviceEntry = Entry<Device>;
pub type ApplicationEntry = Entry<Application>;

pub type DeviceRegistry = Registry<DeviceEntry>;
pub type ApplicationRegistry = Registry<ApplicationEntry>;

impl DeviceRegistry {
    pub fn for_devices() -> Self {
        Registry::new(|name| CoreError::DeviceExists { name })
    }
}

impl ApplicationRegistry {
    pub fn for_applications() -> Self {
        Registry::new(|name| CoreError::ApplicationExists { name })
    }
}

/// The pair of registries one hub owns.
pub struct Registries {
    pub devices: DeviceRegistry,
    pub applications: ApplicationRegistry,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            devices: DeviceRegistry::for_devices(),
            applications: ApplicationRegistry::for_applications(),
        }
    }
}

impl Registries {
    pub fn clear(&self) {
        self.applications.clear();
        self.devices.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.applications.is_empty()
    }

    /// Remove `name` from both registries.
    pub(crate) fn forget(&self, name: &str) {
        self.applications.remove(name);
        self.devices.remove(name);
    }
}
