//! Store document shared by both backends
//!
//! The memory backend keeps one `StoreState` inside its actor; the file
//! backend loads, mutates and writes one back per operation.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::flag::{Flag, StoreSnapshot};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default, rename = "server_initialized")]
    pub initialized: bool,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    /// Front is the oldest request
    #[serde(default)]
    pub export_requests: VecDeque<String>,
}

impl StoreState {
    #[must_use]
    pub fn get(&self, flag: Flag) -> bool {
        self.flags
            .get(flag.key())
            .copied()
            .unwrap_or_else(|| flag.default_value())
    }

    pub fn set(&mut self, flag: Flag, value: bool) {
        self.flags.insert(flag.key().to_string(), value);
    }

    /// Set `flag` to `new` only if it currently equals `current`
    pub fn compare_and_set(&mut self, flag: Flag, current: bool, new: bool) -> bool {
        if self.get(flag) != current {
            return false;
        }
        self.set(flag, new);
        true
    }

    pub fn push_export_request(&mut self, request: String) {
        self.export_requests.push_back(request);
    }

    pub fn pop_export_request(&mut self) -> Option<String> {
        self.export_requests.pop_front()
    }

    /// First-time setup: collection on, lock off, queue empty
    ///
    /// Returns `false` when the store was already initialized.
    pub fn initialize(&mut self) -> bool {
        if self.initialized {
            return false;
        }
        self.initialized = true;
        self.set(Flag::DataCollection, true);
        self.set(Flag::DataFileLock, false);
        self.export_requests.clear();
        true
    }

    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            initialized: self.initialized,
            data_collection: self.get(Flag::DataCollection),
            data_file_lock: self.get(Flag::DataFileLock),
            pending_export_requests: self.export_requests.len(),
        }
    }
}
