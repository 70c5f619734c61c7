//! Per-owner-user serialization for tree writers. Grounded on the
//! `RwLock<HashMap<K, Arc<tokio::sync::Mutex<_>>>>` shape `castore`'s FUSE
//! layer uses to key open file handles.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use upspin_path::UserName;

/// Hands out one [`tokio::sync::Mutex`] per owner user, created lazily.
/// Holding the guard returned by [`TreeLocks::lock`] serializes all writers
/// to that user's tree, per spec's "concurrent writers to the same tree
/// serialize on a per-user lock".
#[derive(Default)]
pub struct TreeLocks {
    locks: RwLock<HashMap<UserName, Arc<Mutex<()>>>>,
}

impl TreeLocks {
    pub fn new() -> Self {
        TreeLocks::default()
    }

    async fn mutex_for(&self, user: &UserName) -> Arc<Mutex<()>> {
        if let Some(m) = self.locks.read().await.get(user) {
            return m.clone();
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(user.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquires `user`'s write lock, blocking until any other writer to the
    /// same tree releases it.
    pub async fn lock(&self, user: &UserName) -> OwnedMutexGuard<()> {
        let mutex = self.mutex_for(user).await;
        mutex.lock_owned().await
    }
}
