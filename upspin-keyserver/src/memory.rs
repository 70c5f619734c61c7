use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use upspin_path::UserName;
use upspin_types::Error;

use crate::keystore::KeyStore;
use crate::record::UserRecord;

/// The in-process key store used in tests: a `parking_lot`-guarded map,
/// grounded on the same single-lock-per-resource shape as
/// `castore::blobservice::MemoryBlobService`.
#[derive(Clone, Default)]
pub struct InMemoryKeyStore {
    records: Arc<RwLock<HashMap<UserName, UserRecord>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get(&self, user: &UserName) -> Result<Option<UserRecord>, Error> {
        Ok(self.records.read().get(user).cloned())
    }

    async fn put(&self, record: &UserRecord) -> Result<(), Error> {
        self.records
            .write()
            .insert(record.name.clone(), record.clone());
        Ok(())
    }
}
