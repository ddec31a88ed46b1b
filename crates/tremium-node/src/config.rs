//! Configuration file loading for the node

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tremium_core::{LogConfig, NodeConfig};

/// Top-level node configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
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

    /// Load from `TREMIUM_NODE_CONFIG` or the first existing default path
    ///
    /// # Errors
    /// Returns error if no configuration file is found or it does not parse
    pub fn load_default() -> eyre::Result<Self> {
        if let Ok(path) = std::env::var("TREMIUM_NODE_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let paths = [
            PathBuf::from("node.toml"),
            PathBuf::from("/etc/tremium/node.toml"),
            dirs::config_dir()
                .map(|p| p.join("tremium/node.toml"))
                .unwrap_or_default(),
        ];

        for path in paths {
            if !path.as_os_str().is_empty() && path.exists() {
                return Self::load(&path);
            }
        }

        eyre::bail!("no node configuration found; pass --config or set TREMIUM_NODE_CONFIG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_node_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            r#"
            [node]
            node_id = "dev-test_node_machine_5"
            hub_addr = "192.168.1.10:4455"
            image_archive_dir = "/srv/node/images"
            file_transfer_dir = "/srv/node/transfer"
            manifest_path = "/srv/node/image-updates.txt"
            store_path = "/run/tremium/store.json"
            check_interval_secs = 600

            [log]
            file = "/srv/node/transfer/maintenance.log"
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.node.node_id, "dev-test_node_machine_5");
        assert_eq!(config.node.check_interval().as_secs(), 600);
        assert_eq!(config.node.archived_data_file, "archived-data.json");
        assert_eq!(
            config.log.file.as_deref(),
            Some(Path::new("/srv/node/transfer/maintenance.log"))
        );
    }
}
