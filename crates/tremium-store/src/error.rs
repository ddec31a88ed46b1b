//! Error types for tremium-store

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to a coordination store
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// State file could not be opened, locked, read or written
    #[error("store I/O error on {path}: {message}")]
    Io {
        /// State file path
        path: String,
        /// Underlying error message
        message: String,
    },

    /// State file exists but does not hold a valid store document
    #[error("store state at {path} is corrupted: {message}")]
    Corrupted {
        /// State file path
        path: String,
        /// Parser error message
        message: String,
    },

    /// Backend is not reachable (stopped actor, failed blocking task)
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    /// Lock acquisition gave up after the configured deadline
    #[error("timed out after {waited:?} waiting for the data file lock")]
    LockTimeout {
        /// How long the caller polled
        waited: Duration,
    },
}

impl StoreError {
    /// Check if the operation may succeed when repeated later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Io { .. } | StoreError::Unavailable(_) | StoreError::LockTimeout { .. }
        )
    }
}
