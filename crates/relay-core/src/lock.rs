use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

/// Per-session mutual exclusion for attach operations. Distinct session ids
/// run in parallel; overlapping attempts for the same id serialize.
///
/// The map from id to lock is lazily populated and never shrinks during
/// steady-state operation — the set of session ids in play is bounded by
/// the number of log files on disk, so this does not leak unboundedly.
#[derive(Debug, Default)]
pub struct SessionLockMap {
    locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(&id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Serializes `body` against any other caller holding the lock for the
    /// same `id`. Callers with distinct ids proceed concurrently.
    pub async fn acquire<F, Fut, T>(&self, id: Uuid, body: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let lock = self.lock_for(id).await;
        let guard: MutexGuard<'_, ()> = lock.lock().await;
        let result = body().await;
        drop(guard);
        result
    }
}
