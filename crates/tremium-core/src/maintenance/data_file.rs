//! The node's live data file and its rotated archives

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use tremium_store::DataFileLock;

use crate::archive::{regular_file_names, TIMESTAMP_FORMAT};
use crate::config::NodeConfig;
use crate::error::MaintenanceError;

const LOG_SUFFIX: &str = ".log";

/// Live data file plus the naming of its rotated copies
///
/// Rotated copies are named `<stem>-<YYYY-MM-DD_HH-MM-SS>.<ext>` after the
/// archived-data template `<stem>.<ext>`.
#[derive(Debug, Clone)]
pub struct DataFile {
    transfer_dir: PathBuf,
    live_name: String,
    archived_stem: String,
    archived_ext: Option<String>,
    archived_name_regex: Regex,
    max_size: u64,
    excluded: Vec<String>,
}

impl DataFile {
    pub fn new(
        transfer_dir: impl Into<PathBuf>,
        live_name: impl Into<String>,
        archived_template: &str,
        max_size: u64,
    ) -> Self {
        let (stem, ext) = match archived_template.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                (stem.to_string(), Some(ext.to_string()))
            }
            _ => (archived_template.to_string(), None),
        };

        let ext_pattern = ext
            .as_deref()
            .map(|ext| format!(r"\.{}", regex::escape(ext)))
            .unwrap_or_default();
        let archived_name_regex = Regex::new(&format!(
            r"^{}-\d{{4}}-\d{{2}}-\d{{2}}_\d{{2}}-\d{{2}}-\d{{2}}{}$",
            regex::escape(&stem),
            ext_pattern
        ))
        .expect("escaped archived data pattern is valid");

        Self {
            transfer_dir: transfer_dir.into(),
            live_name: live_name.into(),
            archived_stem: stem,
            archived_ext: ext,
            archived_name_regex,
            max_size,
            excluded: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(
            &config.file_transfer_dir,
            &config.data_file,
            &config.archived_data_file,
            config.data_file_max_size,
        )
    }

    #[must_use]
    pub fn transfer_dir(&self) -> &Path {
        &self.transfer_dir
    }

    #[must_use]
    pub fn live_path(&self) -> PathBuf {
        self.transfer_dir.join(&self.live_name)
    }

    /// Keep `path` out of uploads when it lives in the transfer directory
    pub fn exclude(&mut self, path: &Path) {
        let Some(name) = path.file_name() else {
            return;
        };
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        if same_dir(parent, &self.transfer_dir) {
            debug!(file = %path.display(), "excluded from upload");
            self.excluded.push(name.to_string_lossy().into_owned());
        }
    }

    /// Whether the live file has grown past the size threshold
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be inspected
    pub fn needs_rotation(&self) -> Result<bool, MaintenanceError> {
        let path = self.live_path();
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len() > self.max_size),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(MaintenanceError::io("inspect", path, source)),
        }
    }

    /// Name of the rotated copy taken at `at`
    #[must_use]
    pub fn archived_name(&self, at: NaiveDateTime) -> String {
        let timestamp = at.format(TIMESTAMP_FORMAT);
        match &self.archived_ext {
            Some(ext) => format!("{}-{timestamp}.{ext}", self.archived_stem),
            None => format!("{}-{timestamp}", self.archived_stem),
        }
    }

    #[must_use]
    pub fn is_archived(&self, file_name: &str) -> bool {
        self.archived_name_regex.is_match(file_name)
    }

    /// Move the live file aside once it is over the threshold
    ///
    /// Holds the data file lock around the rename and the recreation of an
    /// empty live file. Returns the rotated path, or `None` when the file is
    /// still small enough.
    ///
    /// # Errors
    /// Returns error if the lock cannot be taken or released, or the
    /// filesystem operations fail
    pub async fn rotate(&self, lock: &DataFileLock) -> Result<Option<PathBuf>, MaintenanceError> {
        if !self.needs_rotation()? {
            return Ok(None);
        }

        let guard = lock.acquire().await?;
        let rotated = self.rotate_locked();
        guard.release().await?;

        let rotated = rotated?;
        info!(file = %rotated.display(), "rotated data file");
        Ok(Some(rotated))
    }

    fn rotate_locked(&self) -> Result<PathBuf, MaintenanceError> {
        let live = self.live_path();
        let rotated = self
            .transfer_dir
            .join(self.archived_name(Local::now().naive_local()));

        fs::rename(&live, &rotated).map_err(|e| MaintenanceError::io("rotate", &live, e))?;
        fs::File::create(&live).map_err(|e| MaintenanceError::io("recreate", &live, e))?;
        Ok(rotated)
    }

    /// Append a record to the live file under the data file lock
    ///
    /// # Errors
    /// Returns error if the lock cannot be taken or released, or the write
    /// fails
    pub async fn append(&self, lock: &DataFileLock, bytes: &[u8]) -> Result<(), MaintenanceError> {
        let guard = lock.acquire().await?;
        let written = self.append_locked(bytes).await;
        guard.release().await?;
        written
    }

    async fn append_locked(&self, bytes: &[u8]) -> Result<(), MaintenanceError> {
        let path = self.live_path();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| MaintenanceError::io("open", &path, e))?;

        file.write_all(bytes)
            .await
            .map_err(|e| MaintenanceError::io("append to", &path, e))?;
        file.flush()
            .await
            .map_err(|e| MaintenanceError::io("append to", &path, e))?;
        Ok(())
    }

    /// Log files and rotated data files waiting for upload, sorted by name
    ///
    /// # Errors
    /// Returns error if the transfer directory cannot be listed
    pub fn collect_transfer_files(&self) -> Result<Vec<PathBuf>, MaintenanceError> {
        let names = match regular_file_names(&self.transfer_dir) {
            Ok(names) => names,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(MaintenanceError::io("scan", &self.transfer_dir, source)),
        };

        let files: Vec<PathBuf> = names
            .into_iter()
            .filter(|name| *name != self.live_name && !self.excluded.contains(name))
            .filter(|name| name.ends_with(LOG_SUFFIX) || self.is_archived(name))
            .map(|name| self.transfer_dir.join(name))
            .collect();

        debug!(count = files.len(), "collected files for upload");
        Ok(files)
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
