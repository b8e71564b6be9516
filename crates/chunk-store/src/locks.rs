use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Per-fingerprint reader/writer locks.
///
/// Chunk writes take the shared side so they run concurrently; a merge takes
/// the exclusive side so it never races another merge or a late chunk on
/// namespace deletion.
#[derive(Default)]
pub(crate) struct FingerprintLocks {
    inner: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

/// Guard that prunes the registry entry once the last holder is gone.
pub(crate) struct FingerprintGuard<'a, G> {
    locks: &'a FingerprintLocks,
    fingerprint: String,
    guard: Option<G>,
}

impl<G> Drop for FingerprintGuard<'_, G> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.prune(&self.fingerprint);
    }
}

impl FingerprintLocks {
    fn entry(&self, fingerprint: &str) -> Arc<RwLock<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(fingerprint.to_string()).or_default())
    }

    fn prune(&self, fingerprint: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if map
            .get(fingerprint)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(fingerprint);
        }
    }

    /// Shared access for chunk writes.
    pub(crate) async fn read(
        &self,
        fingerprint: &str,
    ) -> FingerprintGuard<'_, OwnedRwLockReadGuard<()>> {
        let guard = self.entry(fingerprint).read_owned().await;
        FingerprintGuard {
            locks: self,
            fingerprint: fingerprint.to_string(),
            guard: Some(guard),
        }
    }

    /// Exclusive access for merges.
    pub(crate) async fn write(
        &self,
        fingerprint: &str,
    ) -> FingerprintGuard<'_, OwnedRwLockWriteGuard<()>> {
        let guard = self.entry(fingerprint).write_owned().await;
        FingerprintGuard {
            locks: self,
            fingerprint: fingerprint.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
