// ── Domain model ──
//
// Declared topology state. Nothing here talks to a backend.

pub mod device;
pub mod network;
pub mod subnet;
pub mod topology;

pub use device::{Application, Device, DeviceKind, DeviceState, ImageSource};
pub use network::Network;
pub use subnet::{Subnet, SubnetParseError};
pub use topology::{DanglingReference, Topology, TopologyBuilder};
