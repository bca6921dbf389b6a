//! Relay configuration
//!
//! Transport parameters for reaching the remote watcher service. The host
//! delivers them through a configuration event; the values themselves are
//! opaque to the relay core.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RelayError;

/// Port the remote watcher service listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 9092;

/// Connection parameters for the remote watcher service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl RelayConfig {
    /// The `host:port` form used for connecting and for diagnostics
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject parameters no connection attempt could succeed with
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.host.is_empty() {
            return Err(RelayError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(RelayError::Config("port must not be 0".to_string()));
        }
        Ok(())
    }

    /// Interpret a configuration event payload
    pub fn from_json(value: serde_json::Value) -> Result<Self, RelayError> {
        serde_json::from_value(value)
            .map_err(|err| RelayError::Config(format!("bad configuration payload: {err}")))
    }

    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let config_str =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| RelayError::ConfigIo {
                    path: path.to_path_buf(),
                    source,
                })?;

        let config: RelayConfig =
            toml::from_str(&config_str).map_err(|source| RelayError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        info!(path = %path.display(), "loaded relay configuration");
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), RelayError> {
        let path = path.as_ref();
        let config_str = toml::to_string_pretty(self)
            .map_err(|err| RelayError::Config(format!("unserializable configuration: {err}")))?;

        tokio::fs::write(path, config_str)
            .await
            .map_err(|source| RelayError::ConfigIo {
                path: path.to_path_buf(),
                source,
            })?;

        info!(path = %path.display(), "saved relay configuration");
        Ok(())
    }
}
