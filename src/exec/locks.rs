// src/exec/locks.rs

//! Per-output-path write locks.
//!
//! An instance holds the locks for all of its output paths for its whole
//! lifetime, so two instances targeting the same path never run at the same
//! time. Locks are taken in sorted order to avoid lock-order deadlocks.
//! A path's entry is dropped from the map once no guard or waiter uses it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Clone, Default)]
pub struct OutputLocks {
    inner: LockMap,
}

/// Held locks; released on drop.
#[derive(Debug)]
pub struct OutputGuard {
    paths: Vec<PathBuf>,
    guards: Vec<OwnedMutexGuard<()>>,
    map: LockMap,
}

impl OutputGuard {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        self.guards.clear();
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        for path in &self.paths {
            // Only the map itself still holds the lock: nobody waits on it.
            if map.get(path).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                map.remove(path);
            }
        }
    }
}

impl OutputLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, paths: &[PathBuf]) -> OutputGuard {
        let mut sorted = paths.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for path in &sorted {
            let lock = {
                let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
                Arc::clone(map.entry(path.clone()).or_default())
            };
            guards.push(lock.lock_owned().await);
        }

        OutputGuard {
            paths: sorted,
            guards,
            map: Arc::clone(&self.inner),
        }
    }

    /// Paths with a live lock entry.
    pub fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
