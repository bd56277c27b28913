//! Provisioning policy, optionally overridden by `$SWITCHSTACK_HOME/config.json`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchstack_proto::ble::DEVICE_NAME_PREFIX;

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Advertised name prefix that marks a provisionable peripheral
    pub name_prefix: String,
    /// How long one scan collects advertisements
    pub scan_window_secs: u64,
    /// How long to wait for a link to be established
    pub connect_timeout_secs: u64,
    /// How long to wait for the status notification after the connect command
    pub status_timeout_secs: u64,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEVICE_NAME_PREFIX.to_string(),
            scan_window_secs: 5,
            connect_timeout_secs: 10,
            status_timeout_secs: 15,
        }
    }
}

impl ProvisionConfig {
    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_window_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    /// Load `config.json` from `home`. A missing file means defaults.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse { path, source })
    }
}

/// `$SWITCHSTACK_HOME`, or `~/.switchstack`
pub fn switchstack_home() -> Result<PathBuf, ConfigError> {
    if let Ok(home) = std::env::var("SWITCHSTACK_HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".switchstack"))
        .ok_or(ConfigError::NoHome)
}
