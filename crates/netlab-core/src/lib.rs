// netlab-core: topology model, backend controller contract, registries and
// the deployment hub.
//
// Everything here is backend-agnostic. A concrete backend implements
// `Controller`; `SimController` is the in-memory one used by tests and by
// `netlab plan`.

pub mod config;
pub mod controller;
pub mod error;
pub mod hub;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{HubConfig, MonitoringEndpoint};
pub use controller::sim::SimController;
pub use controller::{BackendError, Controller, ExecOutput};
pub use error::CoreError;
pub use hub::{ApplicationOutcome, GatewayInfo, Hub, HubState};
pub use orchestrator::{CleanupReport, DeployReport, SkippedConnection};
pub use registry::{ApplicationEntry, DeviceEntry, Registry};
pub use stream::EntityStream;

pub use model::{
    Application, DanglingReference, Device, DeviceKind, DeviceState, ImageSource, Network,
    Subnet, SubnetParseError, Topology, TopologyBuilder,
};
