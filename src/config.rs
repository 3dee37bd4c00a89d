//! Configuration for a3s-link
//!
//! Configuration is written in HCL. Every section is optional and falls back
//! to its `Default` impl:
//!
//! ```hcl
//! server {
//!   host = "0.0.0.0"
//!   port = 3000
//! }
//!
//! sessions {
//!   dir = "./sessions"
//! }
//!
//! reconnect {
//!   max_attempts = 5
//! }
//! ```

use crate::command::DEFAULT_PREFIX;
use crate::error::{LinkError, Result};
use crate::provider::bridge::BridgeConfig;
use crate::reconnect::ReconnectPolicy;
use crate::types::{DEFAULT_ADDRESS_DOMAIN, DEFAULT_SESSION_ID};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "a3s-link.hcl";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub reconnect: ReconnectPolicy,
    pub timeouts: TimeoutsConfig,
    pub bridge: BridgeConfig,
}

impl LinkConfig {
    /// Parse configuration from HCL
    pub fn from_hcl(content: &str) -> Result<Self> {
        hcl::from_str(content).map_err(|e| LinkError::Config(format!("Invalid HCL: {}", e)))
    }

    /// Render the configuration as HCL
    pub fn to_hcl(&self) -> Result<String> {
        hcl::to_string(self).map_err(|e| LinkError::Config(format!("Failed to render HCL: {}", e)))
    }

    /// Read and parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LinkError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_hcl(&content)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: Vec::new(),
        }
    }
}

/// Session defaults and on-disk layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Root directory holding one subdirectory per session
    pub dir: PathBuf,

    /// Session id used when a start request names none
    pub default_session_id: String,

    /// Domain appended to bare phone numbers
    pub address_domain: String,

    /// Prefix marking inbound chat text as a command
    pub command_prefix: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("sessions"),
            default_session_id: DEFAULT_SESSION_ID.to_string(),
            address_domain: DEFAULT_ADDRESS_DOMAIN.to_string(),
            command_prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

/// Bounds on calls into the messaging client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// Opening a client handle
    pub open_secs: u64,

    /// A single outbound send
    pub send_secs: u64,

    /// Waiting for a fresh session to connect (generate-session)
    pub connect_wait_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            open_secs: 30,
            send_secs: 30,
            connect_wait_secs: 120,
        }
    }
}

impl TimeoutsConfig {
    pub fn open(&self) -> Duration {
        Duration::from_secs(self.open_secs)
    }

    pub fn send(&self) -> Duration {
        Duration::from_secs(self.send_secs)
    }

    pub fn connect_wait(&self) -> Duration {
        Duration::from_secs(self.connect_wait_secs)
    }
}

/// Locate and load the configuration
///
/// Priority: explicit path, `./a3s-link.hcl`, `<config_dir>/a3s-link/config.hcl`,
/// then built-in defaults. Returns the config and the file it came from.
pub fn load_config(explicit_path: Option<&Path>) -> Result<(LinkConfig, Option<PathBuf>)> {
    if let Some(path) = explicit_path {
        tracing::info!("Loading config from {}", path.display());
        return Ok((LinkConfig::from_file(path)?, Some(path.to_path_buf())));
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        tracing::info!("Loading config from ./{}", LOCAL_CONFIG_FILE);
        return Ok((LinkConfig::from_file(&local)?, Some(local)));
    }

    if let Some(config_dir) = dirs_next::config_dir() {
        let hcl_path = config_dir.join("a3s-link/config.hcl");
        if hcl_path.exists() {
            tracing::info!("Loading config from {}", hcl_path.display());
            return Ok((LinkConfig::from_file(&hcl_path)?, Some(hcl_path)));
        }
    }

    tracing::info!("No config found, using defaults");
    Ok((LinkConfig::default(), None))
}
