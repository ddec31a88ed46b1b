//! Flag names and snapshot type

use std::fmt;

use kameo_macros::Reply;
use serde::{Deserialize, Serialize};

/// Boolean flags shared between the node processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    /// Producer may keep collecting sensor data
    DataCollection,
    /// Live data file is being rotated or appended
    DataFileLock,
}

impl Flag {
    /// Key under which the flag is stored
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Flag::DataCollection => "data_collection",
            Flag::DataFileLock => "data_file_lock",
        }
    }

    /// Value reported while the flag has never been written
    #[must_use]
    pub fn default_value(self) -> bool {
        match self {
            Flag::DataCollection => true,
            Flag::DataFileLock => false,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Point-in-time view of a store, for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Reply)]
pub struct StoreSnapshot {
    /// Whether `initialize` has run against this store
    pub initialized: bool,
    /// Current `data_collection` value
    pub data_collection: bool,
    /// Current `data_file_lock` value
    pub data_file_lock: bool,
    /// Number of queued export requests
    pub pending_export_requests: usize,
}
