// ── Core error types ──
//
// User-facing errors from netlab-core. Backend-specific failures arrive as
// `BackendError` and are wrapped, never flattened, so callers can still ask
// whether the backend considered them recoverable.

use thiserror::Error;

use crate::controller::BackendError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lifecycle / conflict errors ──────────────────────────────────
    #[error("Topology already deployed; destroy the hub before deploying another")]
    TopologyAlreadyDeployed,

    #[error("Network '{name}' is declared more than once")]
    DuplicateNetwork { name: String },

    #[error("Device '{name}' is declared more than once")]
    DuplicateDevice { name: String },

    #[error("Device '{name}' is already deployed")]
    DeviceExists { name: String },

    #[error("Application '{name}' is already deployed")]
    ApplicationExists { name: String },

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("No topology is deployed")]
    NoActiveTopology,

    #[error("Device not found: {name}")]
    DeviceNotFound { name: String },

    #[error("Application not found: {name}")]
    ApplicationNotFound { name: String },

    #[error("Network not found: {name}")]
    NetworkNotFound { name: String },

    #[error("Device '{device}' references network '{network}' which is not part of the topology")]
    InvalidReference { device: String, network: String },

    // ── Backend errors (wrapped) ─────────────────────────────────────
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: String,
        timeout_secs: u64,
    },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    // ── Aggregates ───────────────────────────────────────────────────
    #[error("{} network(s) could not be created: {}", .failures.len(), join_errors(.failures))]
    NetworksFailed { failures: Vec<CoreError> },

    #[error("Deployment failed: {cause}{}", rollback_suffix(.rollback_failures))]
    DeploymentFailed {
        #[source]
        cause: Box<CoreError>,
        /// Compensating actions that failed while unwinding.
        rollback_failures: Vec<CoreError>,
    },

    // ── Validation / internal ────────────────────────────────────────
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Name clashes and lifecycle violations of the "already exists" kind.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::TopologyAlreadyDeployed
            | Self::DuplicateNetwork { .. }
            | Self::DuplicateDevice { .. }
            | Self::DeviceExists { .. }
            | Self::ApplicationExists { .. } => true,
            Self::Backend(e) => e.is_conflict(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NoActiveTopology
            | Self::DeviceNotFound { .. }
            | Self::ApplicationNotFound { .. }
            | Self::NetworkNotFound { .. } => true,
            Self::Backend(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// The error that triggered a failed deployment, unwrapping the aggregate.
    pub fn root_cause(&self) -> &CoreError {
        match self {
            Self::DeploymentFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

fn join_errors(errors: &[CoreError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn rollback_suffix(failures: &[CoreError]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(
            " (rollback incomplete, {} failure(s): {})",
            failures.len(),
            join_errors(failures)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_failed_mentions_rollback_failures() {
        let err = CoreError::DeploymentFailed {
            cause: Box::new(CoreError::Backend(BackendError::DeployFailed {
                device: "r1".into(),
                reason: "boom".into(),
            })),
            rollback_failures: vec![CoreError::Backend(BackendError::NetworkBusy {
                network: "lan1".into(),
                attached: vec!["r1".into()],
            })],
        };
        let msg = err.to_string();
        assert!(msg.contains("boom"), "{msg}");
        assert!(msg.contains("rollback incomplete, 1 failure(s)"), "{msg}");
        assert!(msg.contains("lan1"), "{msg}");
    }

    #[test]
    fn root_cause_unwraps_nested_aggregates() {
        let err = CoreError::DeploymentFailed {
            cause: Box::new(CoreError::DeploymentFailed {
                cause: Box::new(CoreError::NoActiveTopology),
                rollback_failures: vec![],
            }),
            rollback_failures: vec![],
        };
        assert!(matches!(err.root_cause(), CoreError::NoActiveTopology));
    }

    #[test]
    fn classification_covers_wrapped_backend_errors() {
        assert!(CoreError::TopologyAlreadyDeployed.is_conflict());
        assert!(
            CoreError::Backend(BackendError::NetworkConflict {
                network: "lan1".into()
            })
            .is_conflict()
        );
        assert!(
            CoreError::Backend(BackendError::DeviceNotFound {
                device: "x".into()
            })
            .is_not_found()
        );
        assert!(!CoreError::Internal("x".into()).is_not_found());
    }
}
