//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help
//! text and stable exit codes.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use netlab_config::ConfigError;
use netlab_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const BACKEND: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const DEPLOY: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONFIG: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Topology files ───────────────────────────────────────────────
    #[error("Invalid topology in {}", .path.display())]
    #[diagnostic(
        code(netlab::invalid_topology),
        help("{reason}\nRun: netlab validate <FILE> after fixing the file")
    )]
    InvalidTopology { path: PathBuf, reason: String },

    #[error("Cannot read {}", .path.display())]
    #[diagnostic(code(netlab::read_failed))]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(netlab::not_found))]
    NotFound { message: String },

    #[error("{message}")]
    #[diagnostic(code(netlab::conflict))]
    Conflict { message: String },

    // ── Deployment ───────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(
        code(netlab::deploy_failed),
        help("{rollback_failures} compensating action(s) failed while rolling back")
    )]
    DeployFailed {
        message: String,
        rollback_failures: usize,
    },

    #[error("Backend error: {message}")]
    #[diagnostic(code(netlab::backend))]
    Backend { message: String },

    #[error("{operation} timed out after {seconds}s")]
    #[diagnostic(
        code(netlab::timeout),
        help("Raise hub.operation_timeout in the config file or NETLAB_HUB__OPERATION_TIMEOUT.")
    )]
    Timeout { operation: String, seconds: u64 },

    #[error("{message}")]
    #[diagnostic(code(netlab::general))]
    General { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(netlab::config_invalid))]
    ConfigInvalid { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(netlab::config))]
    Config(Box<figment::Error>),

    #[error("Config file already exists at {}", .path.display())]
    #[diagnostic(
        code(netlab::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: PathBuf },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {message}")]
    #[diagnostic(code(netlab::serialize))]
    Serialize { message: String },
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidTopology { .. } => exit_code::USAGE,
            Self::ReadFailed { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                exit_code::NOT_FOUND
            }
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } | Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::DeployFailed { .. } => exit_code::DEPLOY,
            Self::Backend { .. } => exit_code::BACKEND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::ConfigInvalid { .. } | Self::Config(_) => exit_code::CONFIG,
            _ => exit_code::GENERAL,
        }
    }

    /// Attribute a topology loading failure to `path`.
    pub fn topology(path: PathBuf, err: ConfigError) -> Self {
        match err {
            ConfigError::Read { path, source } => Self::ReadFailed { path, source },
            ConfigError::Io(source) => Self::ReadFailed { path, source },
            other => Self::InvalidTopology {
                path,
                reason: other.to_string(),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::ConfigInvalid { field, reason },
            ConfigError::Figment(err) => Self::Config(err),
            ConfigError::Io(err) => Self::Io(err),
            ConfigError::Read { path, source } => Self::ReadFailed { path, source },
            ConfigError::Topology(err) => err.into(),
            other => Self::ConfigInvalid {
                field: "config".into(),
                reason: other.to_string(),
            },
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Timeout {
                operation,
                timeout_secs,
            } => Self::Timeout {
                operation,
                seconds: timeout_secs,
            },

            CoreError::DeploymentFailed {
                ref rollback_failures,
                ..
            } => Self::DeployFailed {
                rollback_failures: rollback_failures.len(),
                message: err.to_string(),
            },

            CoreError::NetworksFailed { .. } => Self::DeployFailed {
                message: err.to_string(),
                rollback_failures: 0,
            },

            ref e if e.is_conflict() => Self::Conflict {
                message: e.to_string(),
            },

            ref e if e.is_not_found() => Self::NotFound {
                message: e.to_string(),
            },

            CoreError::Backend(e) => Self::Backend {
                message: e.to_string(),
            },

            CoreError::InvalidReference { .. } | CoreError::Validation { .. } => {
                Self::InvalidTopology {
                    path: PathBuf::from("<topology>"),
                    reason: err.to_string(),
                }
            }

            other => Self::General {
                message: other.to_string(),
            },
        }
    }
}
