//! Polling lock over the `data_file_lock` flag
//!
//! Advisory only: it excludes other `DataFileLock` users, nothing else. There
//! is no owner identity and no lease, so a holder that dies without releasing
//! leaves the flag set until someone clears it by hand
//! (`tremium-node store init` on a fresh store, or `set_flag`).

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::flag::Flag;
use crate::traits::CoordinationStore;

/// Default delay between acquisition attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative lock shared by the data producer and the maintenance run
#[derive(Clone)]
pub struct DataFileLock {
    store: Arc<dyn CoordinationStore>,
    poll_interval: Duration,
    acquire_timeout: Option<Duration>,
}

impl DataFileLock {
    /// Create a lock polling every `poll_interval`, waiting indefinitely
    pub fn new(store: Arc<dyn CoordinationStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
            acquire_timeout: None,
        }
    }

    /// Give up acquisition after `timeout`
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Whether some holder currently has the flag set
    ///
    /// # Errors
    /// Returns error if the store cannot be read
    pub async fn is_held(&self) -> Result<bool, StoreError> {
        self.store.get_flag(Flag::DataFileLock).await
    }

    /// Take the lock if it is free right now
    ///
    /// # Errors
    /// Returns error if the store cannot be reached
    pub async fn try_acquire(&self) -> Result<Option<DataFileLockGuard<'_>>, StoreError> {
        let acquired = self
            .store
            .compare_and_set(Flag::DataFileLock, false, true)
            .await?;
        Ok(acquired.then(|| DataFileLockGuard {
            lock: self,
            released: false,
        }))
    }

    /// Poll until the lock is free, then take it
    ///
    /// # Errors
    /// Returns `StoreError::LockTimeout` when an acquire timeout is configured
    /// and elapses, or any store error
    pub async fn acquire(&self) -> Result<DataFileLockGuard<'_>, StoreError> {
        let started = Instant::now();
        let mut attempts: u64 = 0;

        loop {
            if let Some(guard) = self.try_acquire().await? {
                debug!(attempts, waited = ?started.elapsed(), "data file lock acquired");
                return Ok(guard);
            }
            attempts += 1;

            if let Some(timeout) = self.acquire_timeout {
                if started.elapsed() >= timeout {
                    return Err(StoreError::LockTimeout {
                        waited: started.elapsed(),
                    });
                }
            }

            sleep(self.poll_interval).await;
        }
    }
}

/// Held data file lock; call [`DataFileLockGuard::release`] when done
#[must_use = "the data file stays locked until `release` is awaited"]
pub struct DataFileLockGuard<'a> {
    lock: &'a DataFileLock,
    released: bool,
}

impl DataFileLockGuard<'_> {
    /// Clear the lock flag
    ///
    /// # Errors
    /// Returns error if the store cannot be written; the flag then stays set
    pub async fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        self.lock.store.set_flag(Flag::DataFileLock, false).await?;
        debug!("data file lock released");
        Ok(())
    }
}

impl Drop for DataFileLockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!("data file lock guard dropped without release, clearing flag in background");
        let store = Arc::clone(&self.lock.store);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.set_flag(Flag::DataFileLock, false).await {
                        warn!(error = %e, "failed to clear data file lock");
                    }
                });
            }
            Err(_) => warn!("no runtime available, data file lock flag stays set"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn lock() -> DataFileLock {
        DataFileLock::new(Arc::new(MemoryStore::spawn()), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_try_acquire_excludes_second_holder() {
        let lock = lock();

        let guard = lock.try_acquire().await.unwrap().expect("lock is free");
        assert!(lock.is_held().await.unwrap());
        assert!(lock.try_acquire().await.unwrap().is_none());

        guard.release().await.unwrap();
        assert!(!lock.is_held().await.unwrap());
    }

    #[tokio::test]
    async fn test_acquire_timeout() {
        let lock = lock().with_acquire_timeout(Duration::from_millis(50));

        let guard = lock.acquire().await.unwrap();
        let err = lock.acquire().await.err().expect("second acquire must time out");
        assert!(matches!(err, StoreError::LockTimeout { .. }));

        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_guard_clears_flag() {
        let lock = lock();

        drop(lock.acquire().await.unwrap());

        // Cleared by a spawned task, so poll for it
        let reacquired = tokio::time::timeout(Duration::from_secs(1), lock.acquire())
            .await
            .expect("flag should be cleared after drop")
            .unwrap();
        reacquired.release().await.unwrap();
    }
}
