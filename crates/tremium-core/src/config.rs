//! Configuration types for the hub and node roles
//!
//! Loaded once by the binaries and handed to each component at construction.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default archive naming convention: id-prefix, component, timestamp
pub const DEFAULT_ARCHIVE_PATTERN: &str =
    r"^(.+)_([^_]+)_(\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2})\.tar";

/// Connection protocol tuning shared by both roles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Longest wait for incoming bytes before the exchange is treated as over
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Longest wait for the node to establish a connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Read/write chunk size for file streaming
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

fn default_idle_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_chunk_size() -> usize {
    4096
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

impl ProtocolConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Chunk size, never zero
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.max_chunk_size.max(1)
    }
}

/// Age-based purge of a transfer directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Run the purge on a schedule while serving
    #[serde(default = "default_retention_enabled")]
    pub enabled: bool,
    /// Timestamped files older than this many days are deleted
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    /// Delay between scheduled purges
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

fn default_retention_enabled() -> bool {
    true
}

fn default_max_age_days() -> u32 {
    7
}

fn default_purge_interval_secs() -> u64 {
    3600
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_retention_enabled(),
            max_age_days: default_max_age_days(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

impl RetentionConfig {
    #[must_use]
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

/// Hub server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Listening endpoint
    #[serde(default = "default_hub_bind")]
    pub bind: String,
    /// Update archives offered to nodes
    pub image_archive_dir: PathBuf,
    /// Destination of files uploaded by nodes
    pub file_transfer_dir: PathBuf,
    /// Archive naming regex with three capture groups
    #[serde(default = "default_archive_pattern")]
    pub archive_pattern: String,
    /// Concurrent connection limit (unbounded when absent)
    #[serde(default)]
    pub max_connections: Option<usize>,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

fn default_hub_bind() -> String {
    "0.0.0.0:4455".to_string()
}

fn default_archive_pattern() -> String {
    DEFAULT_ARCHIVE_PATTERN.to_string()
}

/// Node maintenance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identifier sent with `CHECK_AVAILABLE_UPDATES`
    pub node_id: String,
    /// Hub endpoint to dial
    pub hub_addr: String,
    /// Currently installed image archives
    pub image_archive_dir: PathBuf,
    /// Data and log files waiting for upload
    pub file_transfer_dir: PathBuf,
    /// Live data file name inside the transfer directory
    #[serde(default = "default_data_file")]
    pub data_file: String,
    /// Template for rotated data files, `<stem>.<ext>`
    #[serde(default = "default_archived_data_file")]
    pub archived_data_file: String,
    /// Live data file size (bytes) that triggers rotation
    #[serde(default = "default_data_file_max_size")]
    pub data_file_max_size: u64,
    /// Update manifest read by the external installer
    pub manifest_path: PathBuf,
    /// Prepended to image names to form registry references
    #[serde(default)]
    pub registry_prefix: String,
    /// Archive naming regex with three capture groups
    #[serde(default = "default_archive_pattern")]
    pub archive_pattern: String,
    /// Coordination store document shared with the producer
    pub store_path: PathBuf,
    /// Delay between data file lock attempts
    #[serde(default = "default_lock_poll_interval_ms")]
    pub lock_poll_interval_ms: u64,
    /// Give up waiting for the data file lock after this long
    #[serde(default)]
    pub lock_timeout_secs: Option<u64>,
    /// Delay between maintenance runs in watch mode
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

fn default_data_file() -> String {
    "extracted-data.json".to_string()
}

fn default_archived_data_file() -> String {
    "archived-data.json".to_string()
}

fn default_data_file_max_size() -> u64 {
    1_000_000
}

fn default_lock_poll_interval_ms() -> u64 {
    100
}

fn default_check_interval_secs() -> u64 {
    3600
}

impl NodeConfig {
    #[must_use]
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms.max(1))
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }
}

/// Log sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Emit JSON lines
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            json: false,
        }
    }
}
