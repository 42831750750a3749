/*============================================================
  Synavera Project: Syn-UA
  Module: ua_core::config
  Etiquette: Synavera Script Etiquette - Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Load and validate update agent configuration from TOML,
    falling back to deployment defaults when no file exists.

  Security / Safety Notes:
    Transfer passwords are never stored in configuration; only
    the name of the environment variable that carries one.

  Dependencies:
    serde + toml for parsing, dirs for default locations.

  Operational Scope:
    Read once at startup by the reference agent; CLI flags
    override individual values afterwards.

  Revision History:
    2026-10-16 COD  Authored agent configuration loader.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Explicit defaults for every field
    - Fatal, descriptive configuration failures
============================================================*/

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, UaError};

const DEFAULT_URL: &str = "tcp://localhost:9133";
const DEFAULT_NODE_TYPE: &str = "/ECU/ROM";
const DEFAULT_DELTA_CAP: &str = "A:3;B:3;C:100";

/// Top-level update agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Package handler category served by this agent.
    pub node_type: String,
    pub bus: BusConfig,
    pub paths: PathsConfig,
    pub delta: DeltaConfig,
    pub transfer: TransferConfig,
    pub debug: bool,
    pub reboot_support: bool,
    /// Compare staged files against the received `sha-256`.
    pub verify_checksum: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    pub cert_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub cache_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub version_dir: PathBuf,
    pub log_dir: PathBuf,
}

/// Delta capability descriptor. The capability string is handed to the
/// bus untouched.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    pub enabled: bool,
    pub cap: String,
}

/// Remote staging host used by the transfer stage.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    /// Name of the environment variable holding the remote password.
    pub password_env: Option<String>,
    pub http_base_url: Option<String>,
    /// Request timeout in seconds for HTTP transfers.
    pub timeout: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_type: DEFAULT_NODE_TYPE.to_string(),
            bus: BusConfig::default(),
            paths: PathsConfig::default(),
            delta: DeltaConfig::default(),
            transfer: TransferConfig::default(),
            debug: false,
            reboot_support: false,
            verify_checksum: true,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            cert_dir: PathBuf::from("/data/sota/certs/rom-ua/"),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let log_dir = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("ua-core")
            .join("logs");
        Self {
            cache_dir: PathBuf::from("/tmp/ua-core/"),
            backup_dir: PathBuf::from("/data/sota/backup/"),
            version_dir: PathBuf::from("/data/sota/versions"),
            log_dir,
        }
    }
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cap: DEFAULT_DELTA_CAP.to_string(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from `path`, or from the default location when
    /// `path` is `None`. Only an explicitly requested file must exist.
    pub fn load_from_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(explicit) => Self::load(explicit),
            None => match default_config_path() {
                Some(candidate) if candidate.exists() => Self::load(&candidate),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            UaError::Config(format!(
                "Failed to read configuration {}: {err}",
                path.display()
            ))
        })?;
        Self::from_toml(&raw).map_err(|err| match err {
            UaError::Config(msg) => UaError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| UaError::Config(format!("invalid TOML: {err}")))
    }

    /// Reject configurations the agent cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.bus.url.trim().is_empty() {
            return Err(UaError::Config("bus url must not be empty".into()));
        }
        if self.bus.cert_dir.as_os_str().is_empty() {
            return Err(UaError::Config(
                "certificate directory must not be empty".into(),
            ));
        }
        if self.node_type.trim().is_empty() {
            return Err(UaError::Config("node type must not be empty".into()));
        }
        if self.delta.enabled
            && (self.paths.cache_dir.as_os_str().is_empty()
                || self.paths.backup_dir.as_os_str().is_empty())
        {
            return Err(UaError::Config(
                "cache and backup directories are required when delta is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding the post-mortem log files.
    pub fn log_dir(&self) -> PathBuf {
        self.paths.log_dir.clone()
    }
}

/// `<config dir>/ua-core/agent.toml`, when a config dir is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ua-core").join("agent.toml"))
}
