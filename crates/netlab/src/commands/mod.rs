//! Command handlers, one module per top-level subcommand.

pub mod config_cmd;
pub mod plan;
pub mod validate;

use std::path::Path;

use netlab_core::{Device, ImageSource, Topology};

use crate::error::CliError;

/// Load a topology file, attributing failures to its path.
pub(crate) fn load_topology(path: &Path) -> Result<Topology, CliError> {
    netlab_config::load_topology(path).map_err(|e| CliError::topology(path.to_path_buf(), e))
}

/// Short human form of where a device's image comes from.
pub(crate) fn image_label(device: &Device) -> String {
    match device.image {
        Some(ImageSource::Tag(ref tag)) => tag.clone(),
        Some(ImageSource::BuildContext(ref path)) => format!("build:{}", path.display()),
        None => "(default)".into(),
    }
}
