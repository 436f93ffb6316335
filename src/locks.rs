use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::Result;

/// One async mutex per document id, created on demand.
///
/// Writers on the same id queue up in arrival order; writers on different
/// ids never contend.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
}

/// Held while a document is being written. Releases on drop.
#[derive(Debug)]
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: u64) -> Result<KeyGuard> {
        let lock = {
            let mut locks = self.locks.lock()?;
            // Drop entries nobody holds or waits on.
            locks.retain(|key, l| *key == id || Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(id).or_default())
        };
        Ok(KeyGuard {
            _guard: lock.lock_owned().await,
        })
    }

    /// Number of ids with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().map_or(0, |l| l.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
