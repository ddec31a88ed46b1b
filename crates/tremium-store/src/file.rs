//! File-backed coordination store
//!
//! The store document lives in a JSON file. Each operation opens the file,
//! takes an exclusive `fs2` lock, applies one change and writes the document
//! back before the lock is dropped, so unrelated processes pointing at the
//! same path observe a single consistent sequence of operations.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::flag::{Flag, StoreSnapshot};
use crate::state::StoreState;
use crate::traits::CoordinationStore;

/// `CoordinationStore` persisted in a locked JSON file
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Use `path` as the store document, creating it and its parent
    /// directory when missing
    ///
    /// # Errors
    /// Returns error if the directory or file cannot be created
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, &e))?;
        }
        open_locked(&path)?;
        debug!(path = %path.display(), "opened file coordination store");
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `apply` against the document under the file lock
    async fn transact<T, F>(&self, apply: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StoreState) -> T + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || transact_blocking(&path, apply))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn open_locked(path: &Path) -> Result<File, StoreError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| io_error(path, &e))?;
    file.lock_exclusive().map_err(|e| io_error(path, &e))?;
    Ok(file)
}

fn transact_blocking<T>(
    path: &Path,
    apply: impl FnOnce(&mut StoreState) -> T,
) -> Result<T, StoreError> {
    // Lock is released when `file` is dropped at the end of this function
    let mut file = open_locked(path)?;

    let mut raw = String::new();
    file.read_to_string(&mut raw)
        .map_err(|e| io_error(path, &e))?;

    let mut state = if raw.trim().is_empty() {
        StoreState::default()
    } else {
        serde_json::from_str(&raw).map_err(|e| StoreError::Corrupted {
            path: path.display().to_string(),
            message: e.to_string(),
        })?
    };

    let before = state.clone();
    let result = apply(&mut state);

    if state != before || raw.trim().is_empty() {
        let document = serde_json::to_vec_pretty(&state).map_err(|e| StoreError::Corrupted {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        file.set_len(0).map_err(|e| io_error(path, &e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| io_error(path, &e))?;
        file.write_all(&document)
            .map_err(|e| io_error(path, &e))?;
        file.sync_data().map_err(|e| io_error(path, &e))?;
    }

    Ok(result)
}

#[async_trait]
impl CoordinationStore for FileStore {
    #[instrument(skip(self), level = "trace")]
    async fn get_flag(&self, flag: Flag) -> Result<bool, StoreError> {
        self.transact(move |state| state.get(flag)).await
    }

    #[instrument(skip(self), level = "trace")]
    async fn set_flag(&self, flag: Flag, value: bool) -> Result<(), StoreError> {
        self.transact(move |state| state.set(flag, value)).await
    }

    #[instrument(skip(self), level = "trace")]
    async fn compare_and_set(
        &self,
        flag: Flag,
        current: bool,
        new: bool,
    ) -> Result<bool, StoreError> {
        self.transact(move |state| state.compare_and_set(flag, current, new))
            .await
    }

    async fn push_export_request(&self, request: &str) -> Result<(), StoreError> {
        let request = request.to_string();
        self.transact(move |state| state.push_export_request(request))
            .await
    }

    async fn pop_export_request(&self) -> Result<Option<String>, StoreError> {
        self.transact(StoreState::pop_export_request).await
    }

    async fn initialize(&self) -> Result<bool, StoreError> {
        self.transact(StoreState::initialize).await
    }

    async fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        self.transact(|state| state.snapshot()).await
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}
