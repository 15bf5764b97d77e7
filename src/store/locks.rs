//! Per-list locks around cached range access.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async lock per list id.
///
/// Reading a range and extending it from the remote source must not
/// interleave with another extension of the same list, otherwise the second
/// writer would widen the range from stale bounds.
///
/// Locks nobody holds or waits for are dropped whenever a lock is handed
/// out, so the table only grows with the number of lists in use at once.
#[derive(Debug, Default)]
pub struct ListLocks {
    locks: Mutex<AHashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ListLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `list_id`. Released when the guard drops.
    pub async fn lock(&self, list_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|id, lock| id == list_id || Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(list_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of lists with a lock in the table.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
