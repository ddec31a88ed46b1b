//! Configuration file loading for the hub

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tremium_core::{HubConfig, LogConfig};

/// Top-level hub configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub hub: HubConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("failed to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `TREMIUM_HUB_CONFIG` or the first existing default path
    ///
    /// # Errors
    /// Returns error if no configuration file is found or it does not parse
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var("TREMIUM_HUB_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let paths = [
            PathBuf::from("hub.toml"),
            PathBuf::from("/etc/tremium/hub.toml"),
            dirs::config_dir()
                .map(|p| p.join("tremium/hub.toml"))
                .unwrap_or_default(),
        ];

        for path in paths {
            if !path.as_os_str().is_empty() && path.exists() {
                return Self::load(&path);
            }
        }

        eyre::bail!("no hub configuration found; pass --config or set TREMIUM_HUB_CONFIG")
    }
}
