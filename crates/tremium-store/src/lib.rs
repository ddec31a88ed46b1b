//! tremium-store: Coordination store shared by node processes
//!
//! Provides the `CoordinationStore` trait (boolean flags plus an export
//! request queue), an in-process actor backend, a file backend usable across
//! unrelated processes, and the polling lock that guards data file rotation.

pub mod error;
pub mod file;
pub mod flag;
pub mod lock;
pub mod memory;
pub mod state;
pub mod traits;

pub use error::StoreError;
pub use file::FileStore;
pub use flag::{Flag, StoreSnapshot};
pub use lock::{DataFileLock, DataFileLockGuard};
pub use memory::{MemoryStore, StoreActor};
pub use traits::CoordinationStore;
