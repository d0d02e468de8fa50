//! Application home directory and `config.json`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use pillnow_ble::TransportConfig;
use pillnow_proto::ble::{DEVICE_NAME_MARKER, SCAN_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};

pub const HOME_ENV: &str = "PILLNOW_HOME";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no home directory; set PILLNOW_HOME")]
    NoHomeDir,
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// `$PILLNOW_HOME`, or `~/.pillnow`. Created if missing.
pub fn pillnow_home() -> Result<PathBuf, ConfigError> {
    let home = match std::env::var(HOME_ENV) {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => dirs::home_dir().ok_or(ConfigError::NoHomeDir)?.join(".pillnow"),
    };
    ensure_dir(&home)?;
    Ok(home)
}

pub(crate) fn ensure_dir(dir: &Path) -> Result<(), ConfigError> {
    fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Substring of the dispenser's advertised name
    pub device_marker: String,
    pub scan_timeout_secs: u64,
    /// Start in mock mode without touching the radio
    pub simulate: bool,
    /// Owner of the container documents
    pub user_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_marker: DEVICE_NAME_MARKER.to_string(),
            scan_timeout_secs: SCAN_TIMEOUT_SECS,
            simulate: false,
            user_id: "local".to_string(),
        }
    }
}

impl AppConfig {
    /// Read `config.json` from `home`, writing the defaults on first run
    pub fn load_or_create(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_FILE);
        if path.exists() {
            let data = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&data).map_err(|source| ConfigError::Json { path, source })
        } else {
            let config = Self::default();
            config.save(home)?;
            info!("Created default config: {}", path.display());
            Ok(config)
        }
    }

    pub fn save(&self, home: &Path) -> Result<(), ConfigError> {
        ensure_dir(home)?;
        let path = home.join(CONFIG_FILE);
        let data = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, data).map_err(|source| ConfigError::Io { path, source })
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            device_marker: self.device_marker.clone(),
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
            ..TransportConfig::default()
        }
    }
}
