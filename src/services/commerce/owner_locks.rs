use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::auth::Owner;

/// Entries are pruned once the map grows past this many owners.
const PRUNE_THRESHOLD: usize = 1024;

/// Serializes cart mutations and order builds for one owner within this process.
#[derive(Clone, Default)]
pub struct OwnerLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, owner: &Owner) -> OwnedMutexGuard<()> {
        if self.locks.len() > PRUNE_THRESHOLD {
            // Only the map holds an idle lock
            self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        let lock = self
            .locks
            .entry(owner.key())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
