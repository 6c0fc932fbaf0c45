//! CLI configuration file and per-device state

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use sosync_api_client::HttpServiceConfig;
use sosync_core::CoordinatorConfig;

const APP_DIR: &str = "sosync";
const DEVICE_ID_FILE: &str = "device-id";

/// Contents of `config.toml`. Every section is optional.
///
/// ```toml
/// state_dir = "/var/lib/sosync"
///
/// [coordinator]
/// user_id = 42
/// device_origin = "COMPANION"
///
/// [api]
/// base_url = "https://api.example.com/api"
/// access_token = "..."
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub state_dir: Option<PathBuf>,
    pub coordinator: CoordinatorConfig,
    pub api: HttpServiceConfig,
}

impl CliConfig {
    /// `<config dir>/sosync/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Load `path`, or the default location when `None`. A missing file yields
    /// the defaults; an unreadable or malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Where the session snapshot and device id live
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
        })
    }
}

/// Stable identifier for this installation, generated on first use
pub fn device_id(state_dir: &Path) -> Result<String> {
    let path = state_dir.join(DEVICE_ID_FILE);
    if let Ok(existing) = fs::read_to_string(&path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;
    let id = uuid::Uuid::new_v4().to_string();
    fs::write(&path, &id).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(device_id = %id, "Generated device identifier");
    Ok(id)
}
