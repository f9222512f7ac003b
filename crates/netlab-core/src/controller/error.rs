// ── Backend error types ──
//
// Failures a `Controller` implementation reports. The contract never
// retries; it only tells the caller whether retrying could make sense.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    // ── Networks ─────────────────────────────────────────────────────
    #[error("Network '{network}' already exists in the backend")]
    NetworkConflict { network: String },

    #[error("Network '{network}' still has attached devices: {}", .attached.join(", "))]
    NetworkBusy {
        network: String,
        attached: Vec<String>,
    },

    #[error("Network '{network}' not found in the backend")]
    NetworkNotFound { network: String },

    // ── Images / deployment ──────────────────────────────────────────
    #[error("Image '{tag}' not found")]
    ImageNotFound { tag: String },

    #[error("Failed to build image from {}: {reason}", .path.display())]
    BuildFailed { path: PathBuf, reason: String },

    #[error("Failed to deploy device '{device}': {reason}")]
    DeployFailed { device: String, reason: String },

    #[error("Device '{device}' not found in the backend")]
    DeviceNotFound { device: String },

    // ── Attachments ──────────────────────────────────────────────────
    #[error("Device '{device}' is already connected to '{network}'")]
    AlreadyConnected { device: String, network: String },

    #[error("Device '{device}' is not connected to '{network}'")]
    NotConnected { device: String, network: String },

    #[error(
        "Connecting '{device}' to '{network}' failed after attaching to [{}]: {source}",
        .attached.join(", ")
    )]
    PartialConnect {
        device: String,
        network: String,
        /// Networks that were attached before the failure and then detached again.
        attached: Vec<String>,
        #[source]
        source: Box<BackendError>,
    },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Command failed in '{device}': {reason}")]
    ExecFailed { device: String, reason: String },

    #[error("No gateway address for device '{device}'")]
    AddressNotResolved { device: String },
}

impl BackendError {
    /// Whether the condition concerns a single resource (missing, clashing,
    /// busy) rather than the backend as a whole.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::BackendUnavailable { .. }
            | Self::BuildFailed { .. }
            | Self::DeployFailed { .. }
            | Self::ExecFailed { .. } => false,
            Self::PartialConnect { source, .. } => source.is_recoverable(),
            Self::NetworkConflict { .. }
            | Self::NetworkBusy { .. }
            | Self::NetworkNotFound { .. }
            | Self::ImageNotFound { .. }
            | Self::DeviceNotFound { .. }
            | Self::AlreadyConnected { .. }
            | Self::NotConnected { .. }
            | Self::AddressNotResolved { .. } => true,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::NetworkConflict { .. } | Self::NetworkBusy { .. } | Self::AlreadyConnected { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NetworkNotFound { .. } | Self::ImageNotFound { .. } | Self::DeviceNotFound { .. }
        )
    }
}
