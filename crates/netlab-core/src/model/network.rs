// ── Network domain types ──

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::subnet::Subnet;

/// A named L2/L3 segment of a topology.
///
/// `members` lists the devices of the owning topology that reference this
/// network. It is filled in by [`TopologyBuilder::build`](super::TopologyBuilder::build)
/// and records intended membership, not liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub subnet: Subnet,
    #[serde(default)]
    pub members: BTreeSet<String>,
}

impl Network {
    pub fn new(name: impl Into<String>, subnet: Subnet) -> Self {
        Self {
            name: name.into(),
            subnet,
            members: BTreeSet::new(),
        }
    }

    pub fn has_member(&self, device: &str) -> bool {
        self.members.contains(device)
    }
}
