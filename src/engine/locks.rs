use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::model::BucketKey;

/// What a writer must hold exclusively. `Entry` sorts before `Bucket`, and
/// an entry lock is always taken before any bucket lock.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Entry(Ulid),
    Bucket(BucketKey),
}

/// Mutex table keyed by `LockKey`. Writers on different keys never contend.
#[derive(Default)]
pub struct KeyedLocks {
    slots: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: LockKey) -> Arc<Mutex<()>> {
        self.slots.entry(key).or_default().value().clone()
    }

    pub async fn lock(&self, key: LockKey) -> OwnedMutexGuard<()> {
        self.slot(key).lock_owned().await
    }

    /// Acquire every key in sorted order so that two writers with
    /// overlapping key sets cannot deadlock.
    pub async fn lock_all(&self, keys: impl IntoIterator<Item = LockKey>) -> Vec<OwnedMutexGuard<()>> {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Drop the slot of a deleted entry. Late waiters still hold their own
    /// `Arc` and will observe the entry as gone.
    pub fn forget(&self, key: &LockKey) {
        self.slots.remove(key);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
