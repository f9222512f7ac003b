//! `netlab validate`: parse a topology and describe it.

use serde::Serialize;
use tabled::Tabled;

use netlab_core::{CoreError, DanglingReference, Device, Network, Topology};

use crate::cli::{GlobalOpts, TopologyArgs};
use crate::error::CliError;
use crate::output;

use super::{image_label, load_topology};

#[derive(Serialize)]
struct ValidateOutput<'a> {
    networks: Vec<&'a Network>,
    devices: &'a [Device],
    dangling: Vec<DanglingReference>,
}

#[derive(Tabled)]
struct NetworkRow {
    #[tabled(rename = "Network")]
    name: String,
    #[tabled(rename = "Subnet")]
    subnet: String,
    #[tabled(rename = "Gateway")]
    gateway: String,
    #[tabled(rename = "Members")]
    members: String,
}

impl From<&Network> for NetworkRow {
    fn from(n: &Network) -> Self {
        Self {
            name: n.name.clone(),
            subnet: n.subnet.to_string(),
            gateway: n.subnet.gateway().to_string(),
            members: n.members.iter().map(String::as_str).collect::<Vec<_>>().join(", "),
        }
    }
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Device")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Networks")]
    networks: String,
}

impl From<&Device> for DeviceRow {
    fn from(d: &Device) -> Self {
        Self {
            name: d.name.clone(),
            kind: d.kind.to_string(),
            image: image_label(d),
            networks: d.networks.join(", "),
        }
    }
}

fn detail(out: &ValidateOutput<'_>) -> String {
    let networks: Vec<NetworkRow> = out.networks.iter().map(|n| NetworkRow::from(*n)).collect();
    let devices: Vec<DeviceRow> = out.devices.iter().map(DeviceRow::from).collect();
    format!(
        "{}\n{}",
        output::render_table(&networks),
        output::render_table(&devices)
    )
}

fn names(out: &ValidateOutput<'_>) -> String {
    out.networks
        .iter()
        .map(|n| n.name.as_str())
        .chain(out.devices.iter().map(|d| d.name.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn handle(args: &TopologyArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let topology: Topology = load_topology(&args.file)?;
    let dangling = topology.dangling_references();

    for r in &dangling {
        let warning = CoreError::InvalidReference {
            device: r.device.clone(),
            network: r.network.clone(),
        };
        eprintln!("warning: {warning}");
    }

    let out = ValidateOutput {
        networks: topology.networks().collect(),
        devices: topology.devices(),
        dangling,
    };
    let rendered = output::render_single(&global.output, &out, detail, names)?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
