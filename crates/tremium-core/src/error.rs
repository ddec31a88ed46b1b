//! Error types for tremium-core

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tremium_proto::CommandError;
use tremium_store::StoreError;

use crate::state::ConnectionState;

/// Archive naming and directory scan failures
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Naming pattern does not compile
    #[error("invalid archive pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Naming pattern lacks the id-prefix/component/timestamp groups
    #[error("archive pattern {pattern:?} has {found} capture groups, need 3")]
    MissingCaptureGroups { pattern: String, found: usize },

    /// Archive directory could not be listed
    #[error("failed to scan archive directory {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Filesystem failures while purging a directory
#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("failed to scan {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to delete {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failures of a single connection exchange
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Dialing the hub failed
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Dialing the hub did not complete in time
    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// Command line could not be parsed or validated
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Session was driven out of order
    #[error("invalid connection transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Hub closed or went idle without answering
    #[error("no reply from {addr}")]
    NoReply { addr: String },

    /// Reply bytes are not UTF-8
    #[error("reply from {addr} is not valid UTF-8")]
    InvalidReply { addr: String },

    /// Hub-side archive resolution failed
    #[error(transparent)]
    Resolve(#[from] ArchiveError),

    /// Local file backing a transfer could not be opened or written
    #[error("file error on {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Socket I/O failed mid-exchange
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// Blocking helper task did not complete
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl ProtocolError {
    /// Whether the hub could not be reached at all
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::Connect { .. } | ProtocolError::ConnectTimeout { .. }
        )
    }
}

/// Fatal acceptor failures, propagated to the process supervisor
#[derive(Error, Debug)]
pub enum AcceptorError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] io::Error),

    #[error("connection admission closed")]
    AdmissionClosed,
}

/// Failures that abort a node maintenance run
#[derive(Error, Debug)]
pub enum MaintenanceError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Local filesystem step failed
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Hub sent nothing for a requested update
    #[error("update {file_name} arrived empty")]
    EmptyTransfer { file_name: String },

    /// Archive name does not follow the naming pattern
    #[error("archive name {0:?} does not match the naming pattern")]
    UnparsableArchiveName(String),
}

impl MaintenanceError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        MaintenanceError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Whether the run failed only because the hub was unreachable
    #[must_use]
    pub fn is_hub_unreachable(&self) -> bool {
        matches!(self, MaintenanceError::Protocol(e) if e.is_connection_error())
    }

    /// Whether the coordination store may answer on a later run
    #[must_use]
    pub fn is_store_retryable(&self) -> bool {
        matches!(self, MaintenanceError::Store(e) if e.is_retryable())
    }
}
