//! Coordination store trait

use async_trait::async_trait;

use crate::error::StoreError;
use crate::flag::{Flag, StoreSnapshot};

/// Flags and queue shared between the node's maintenance and producer processes
///
/// Every operation is atomic with respect to other callers of the same store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a flag, falling back to [`Flag::default_value`] when unset
    async fn get_flag(&self, flag: Flag) -> Result<bool, StoreError>;

    async fn set_flag(&self, flag: Flag, value: bool) -> Result<(), StoreError>;

    /// Set `flag` to `new` if it currently holds `current`; returns whether it did
    async fn compare_and_set(&self, flag: Flag, current: bool, new: bool)
    -> Result<bool, StoreError>;

    /// Queue a request for the external exporter
    async fn push_export_request(&self, request: &str) -> Result<(), StoreError>;

    /// Take the oldest queued export request
    async fn pop_export_request(&self) -> Result<Option<String>, StoreError>;

    /// One-time setup of flags and queue; returns `false` if already done
    async fn initialize(&self) -> Result<bool, StoreError>;

    async fn snapshot(&self) -> Result<StoreSnapshot, StoreError>;

    /// Backend name for logging
    fn backend(&self) -> &'static str;

    async fn start_data_collection(&self) -> Result<(), StoreError> {
        self.set_flag(Flag::DataCollection, true).await
    }

    async fn stop_data_collection(&self) -> Result<(), StoreError> {
        self.set_flag(Flag::DataCollection, false).await
    }

    async fn data_collection_enabled(&self) -> Result<bool, StoreError> {
        self.get_flag(Flag::DataCollection).await
    }
}
