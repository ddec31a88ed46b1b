//! Node maintenance run
//!
//! One sequential pass: rotate the data file, upload pending data and logs,
//! fetch updates that replace installed images, then hand the list of
//! substitutions to the installer through the manifest. Completed steps are
//! not rolled back when a later one fails.

mod data_file;
mod manifest;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use tremium_store::{CoordinationStore, DataFileLock};

pub use data_file::DataFile;
pub use manifest::{parse_manifest, write_manifest, UpdateEntry, MANIFEST_END};

use crate::archive::{match_superseded_image, ArchivePattern};
use crate::config::NodeConfig;
use crate::connection::HubClient;
use crate::error::MaintenanceError;

const COMPRESSED_SUFFIX: &str = ".gz";

/// What a maintenance run did
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    /// Rotated copy of the data file, if rotation happened
    pub rotated: Option<PathBuf>,
    /// Files uploaded to the hub and removed locally
    pub uploaded: Vec<PathBuf>,
    /// Offered archives with no installed counterpart
    pub skipped: Vec<String>,
    /// Substitutions written to the manifest
    pub entries: Vec<UpdateEntry>,
}

/// Drives one node's maintenance against the hub
pub struct MaintenanceOrchestrator {
    node_id: String,
    image_archive_dir: PathBuf,
    manifest_path: PathBuf,
    registry_prefix: String,
    pattern: ArchivePattern,
    data_file: DataFile,
    client: HubClient,
    store: Arc<dyn CoordinationStore>,
    lock: DataFileLock,
}

impl MaintenanceOrchestrator {
    /// # Errors
    /// Returns error if the archive naming pattern is invalid
    pub fn new(config: &NodeConfig, store: Arc<dyn CoordinationStore>) -> Result<Self, MaintenanceError> {
        let mut lock = DataFileLock::new(Arc::clone(&store), config.lock_poll_interval());
        if let Some(timeout) = config.lock_timeout() {
            lock = lock.with_acquire_timeout(timeout);
        }

        Ok(Self {
            node_id: config.node_id.clone(),
            image_archive_dir: config.image_archive_dir.clone(),
            manifest_path: config.manifest_path.clone(),
            registry_prefix: config.registry_prefix.clone(),
            pattern: ArchivePattern::new(&config.archive_pattern)?,
            data_file: DataFile::from_config(config),
            client: HubClient::from_config(config),
            store,
            lock,
        })
    }

    /// Leave `path` in place even when it looks like an upload candidate
    #[must_use]
    pub fn exclude_from_upload(mut self, path: &Path) -> Self {
        self.data_file.exclude(path);
        self
    }

    #[must_use]
    pub fn data_file(&self) -> &DataFile {
        &self.data_file
    }

    #[must_use]
    pub fn lock(&self) -> &DataFileLock {
        &self.lock
    }

    /// Run once, logging instead of returning failures
    pub async fn run(&self) -> Option<MaintenanceReport> {
        match self.run_once().await {
            Ok(report) => Some(report),
            Err(e) if e.is_hub_unreachable() => {
                warn!(error = %e, "hub unreachable, maintenance skipped");
                None
            }
            Err(e) if e.is_store_retryable() => {
                warn!(error = %e, "coordination store unavailable, retrying next run");
                None
            }
            Err(e) => {
                error!(error = %e, "maintenance run failed");
                None
            }
        }
    }

    /// Run once
    ///
    /// # Errors
    /// Any failing step aborts the run; earlier steps stay done
    #[instrument(skip(self), fields(node_id = %self.node_id, hub = %self.client.addr()))]
    pub async fn run_once(&self) -> Result<MaintenanceReport, MaintenanceError> {
        let mut report = MaintenanceReport {
            rotated: self.data_file.rotate(&self.lock).await?,
            ..MaintenanceReport::default()
        };

        for path in self.data_file.collect_transfer_files()? {
            self.client.store_file(&path).await?;
            fs::remove_file(&path).map_err(|e| MaintenanceError::io("delete uploaded file", &path, e))?;
            report.uploaded.push(path);
        }

        let candidates = self.client.check_available_updates(&self.node_id).await?;
        for candidate in candidates {
            match self.apply_update(&candidate).await? {
                Some(entry) => report.entries.push(entry),
                None => report.skipped.push(candidate),
            }
        }

        if !report.entries.is_empty() {
            self.store.stop_data_collection().await?;
            write_manifest(&self.manifest_path, &report.entries)?;
        }

        info!(
            rotated = report.rotated.is_some(),
            uploaded = report.uploaded.len(),
            updates = report.entries.len(),
            skipped = report.skipped.len(),
            "maintenance run complete"
        );
        Ok(report)
    }

    /// Fetch `candidate` and retire the image it replaces
    async fn apply_update(&self, candidate: &str) -> Result<Option<UpdateEntry>, MaintenanceError> {
        let Some(superseded) = match_superseded_image(candidate, &self.image_archive_dir, &self.pattern)? else {
            debug!(candidate, "no installed image for component, skipping");
            return Ok(None);
        };

        let transfer = self.client.get_update(candidate, &self.image_archive_dir).await?;
        if transfer.bytes == 0 {
            remove_if_present(&self.image_archive_dir.join(candidate))?;
            return Err(MaintenanceError::EmptyTransfer {
                file_name: candidate.to_string(),
            });
        }

        let compressed = self.image_archive_dir.join(&superseded);
        remove_if_present(&compressed)?;
        if let Some(uncompressed) = superseded.strip_suffix(COMPRESSED_SUFFIX) {
            remove_if_present(&self.image_archive_dir.join(uncompressed))?;
        }

        let old = self
            .pattern
            .parse(&superseded)
            .ok_or_else(|| MaintenanceError::UnparsableArchiveName(superseded.clone()))?;
        let new = self
            .pattern
            .parse(candidate)
            .ok_or_else(|| MaintenanceError::UnparsableArchiveName(candidate.to_string()))?;

        let entry = UpdateEntry::from_images(&self.registry_prefix, &old, &new);
        info!(superseded = %superseded, update = candidate, "installed update archive");
        Ok(Some(entry))
    }
}

fn remove_if_present(path: &Path) -> Result<(), MaintenanceError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MaintenanceError::io("delete", path, e)),
    }
}
