//! `netlab plan`: deploy a topology against the simulated backend.
//!
//! Nothing leaves the process. The output is the exact controller call
//! sequence a real backend would receive, plus the addresses the simulated
//! backend handed out. The hub is torn down before returning.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;
use tracing::debug;

use netlab_core::controller::sim::ControllerCall;
use netlab_core::{Controller, DeviceKind, Hub, SimController, SkippedConnection};

use crate::cli::{GlobalOpts, TopologyArgs};
use crate::error::CliError;
use crate::output;

use super::load_topology;

#[derive(Serialize)]
struct Plan {
    deployment_id: String,
    backend: String,
    calls: Vec<ControllerCall>,
    devices: Vec<PlannedDevice>,
    skipped: Vec<SkippedConnection>,
    teardown_calls: usize,
}

#[derive(Serialize)]
struct PlannedDevice {
    name: String,
    kind: DeviceKind,
    tag: String,
    attachments: Vec<Attachment>,
}

#[derive(Serialize)]
struct Attachment {
    network: String,
    address: Option<Ipv4Addr>,
}

#[derive(Tabled)]
struct CallRow {
    #[tabled(rename = "#")]
    step: usize,
    #[tabled(rename = "Call")]
    call: String,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Device")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Image")]
    tag: String,
    #[tabled(rename = "Addresses")]
    addresses: String,
}

impl From<&PlannedDevice> for DeviceRow {
    fn from(d: &PlannedDevice) -> Self {
        let addresses = d
            .attachments
            .iter()
            .map(|a| match a.address {
                Some(addr) => format!("{}={addr}", a.network),
                None => format!("{}=?", a.network),
            })
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            name: d.name.clone(),
            kind: d.kind.to_string(),
            tag: d.tag.clone(),
            addresses,
        }
    }
}

fn detail(plan: &Plan) -> String {
    let calls: Vec<CallRow> = plan
        .calls
        .iter()
        .enumerate()
        .map(|(i, call)| CallRow {
            step: i + 1,
            call: call.to_string(),
        })
        .collect();
    let devices: Vec<DeviceRow> = plan.devices.iter().map(DeviceRow::from).collect();
    format!(
        "Deployment {} on backend '{}'\n{}\n{}\nTeardown: {} call(s)",
        plan.deployment_id,
        plan.backend,
        output::render_table(&calls),
        output::render_table(&devices),
        plan.teardown_calls
    )
}

fn call_lines(plan: &Plan) -> String {
    plan.calls
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn handle(args: &TopologyArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let topology = load_topology(&args.file)?;
    let config = netlab_config::load_config(global.config.as_deref())?;
    let hub_config = config.to_hub_config()?;

    let sim = Arc::new(SimController::new());
    let controller: Arc<dyn Controller> = sim.clone();
    let hub = Hub::new(controller, hub_config);

    let report = hub.deploy_topology(topology).await?;
    let calls = sim.calls();
    debug!(calls = calls.len(), "plan deployed");

    let devices = report
        .devices
        .iter()
        .filter_map(|name| hub.get_device(name))
        .map(|entry| PlannedDevice {
            name: entry.item.name.clone(),
            kind: entry.item.kind,
            tag: entry.tag.clone(),
            attachments: entry
                .networks
                .iter()
                .map(|network| Attachment {
                    network: network.clone(),
                    address: sim.device_address(&entry.item.name, network),
                })
                .collect(),
        })
        .collect();

    for skip in &report.skipped {
        eprintln!("warning: {}", skip.to_error());
    }

    sim.clear_calls();
    let cleanup = hub.destroy_hub().await?;
    for failure in &cleanup.failures {
        eprintln!("warning: teardown: {failure}");
    }

    let plan = Plan {
        deployment_id: report.deployment_id.to_string(),
        backend: report.backend,
        calls,
        devices,
        skipped: report.skipped,
        teardown_calls: sim.calls().len(),
    };
    let rendered = output::render_single(&global.output, &plan, detail, call_lines)?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
