//! Configuration and topology files for netlab.
//!
//! A TOML config file (plus `NETLAB_*` environment overrides) is turned
//! into `netlab_core::HubConfig`; topology files are turned into
//! `netlab_core::Topology`. Nothing in here talks to a backend.

mod topology;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use netlab_core::config::{DEFAULT_OPERATION_TIMEOUT, DEFAULT_ROUTER_TAG};
use netlab_core::{CoreError, HubConfig, MonitoringEndpoint, SubnetParseError};

pub use topology::{DeviceSpec, NetworkSpec, TopologyFile, load_topology, parse_topology};

pub const ENV_PREFIX: &str = "NETLAB_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed topology file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("network '{network}' has an invalid subnet '{value}': {source}")]
    InvalidSubnet {
        network: String,
        value: String,
        #[source]
        source: SubnetParseError,
    },

    #[error("invalid topology: {0}")]
    Topology(#[from] CoreError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubSection,

    /// Telemetry sink. Absent means devices deploy without monitoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HubSection {
    /// Image for devices that declare none.
    #[serde(default = "default_router_tag")]
    pub router_tag: String,

    /// Upper bound per backend call, humantime syntax ("90s", "2m").
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: String,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            router_tag: default_router_tag(),
            operation_timeout: default_operation_timeout(),
        }
    }
}

fn default_router_tag() -> String {
    DEFAULT_ROUTER_TAG.into()
}
fn default_operation_timeout() -> String {
    humantime::format_duration(DEFAULT_OPERATION_TIMEOUT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MonitoringSection {
    pub address: String,
    pub port: u16,
}

impl Config {
    /// Validate and translate into the runtime hub configuration.
    pub fn to_hub_config(&self) -> Result<HubConfig, ConfigError> {
        let router_tag = self.hub.router_tag.trim();
        if router_tag.is_empty() {
            return Err(ConfigError::Validation {
                field: "hub.router_tag".into(),
                reason: "must not be empty".into(),
            });
        }

        let timeout = parse_timeout(&self.hub.operation_timeout)?;
        let mut hub = HubConfig::default()
            .with_router_tag(router_tag)
            .with_operation_timeout(timeout);

        if let Some(ref m) = self.monitoring {
            if m.address.trim().is_empty() {
                return Err(ConfigError::Validation {
                    field: "monitoring.address".into(),
                    reason: "must not be empty".into(),
                });
            }
            if m.port == 0 {
                return Err(ConfigError::Validation {
                    field: "monitoring.port".into(),
                    reason: "must be between 1 and 65535".into(),
                });
            }
            hub = hub.with_monitoring(MonitoringEndpoint::new(m.address.trim(), m.port));
        }
        Ok(hub)
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, ConfigError> {
    let timeout = humantime::parse_duration(raw.trim()).map_err(|e| ConfigError::Validation {
        field: "hub.operation_timeout".into(),
        reason: format!("'{raw}': {e}"),
    })?;
    if timeout.is_zero() {
        return Err(ConfigError::Validation {
            field: "hub.operation_timeout".into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(timeout)
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("rs", "netlab", "netlab").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("netlab");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load defaults ← TOML file ← `NETLAB_*` environment.
///
/// `path` overrides the platform location. A missing file is not an error;
/// the defaults and environment still apply. Nested keys use a double
/// underscore: `NETLAB_HUB__ROUTER_TAG`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path` (or the platform
/// location), creating parent directories.
pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(path)
}
