use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use upspin_types::{Error, Reference};

use crate::driver::StoreDriver;

/// An in-process, non-durable driver — grounded on
/// `castore::blobservice::MemoryBlobService`'s `Arc<RwLock<HashMap<..>>>`
/// shape, keyed by [`Reference`] instead of a BLAKE3 digest.
#[derive(Clone, Default)]
pub struct MemoryStoreDriver {
    db: Arc<RwLock<HashMap<Reference, Vec<u8>>>>,
}

impl MemoryStoreDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreDriver for MemoryStoreDriver {
    #[tracing::instrument(skip_all, err, fields(reference = %reference))]
    async fn download(&self, reference: &Reference) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.db.read().get(reference).cloned())
    }

    #[tracing::instrument(skip_all, err, fields(reference = %reference))]
    async fn put(&self, reference: &Reference, data: &[u8]) -> Result<(), Error> {
        self.db.write().insert(reference.clone(), data.to_vec());
        Ok(())
    }

    #[tracing::instrument(skip_all, err, fields(reference = %reference))]
    async fn delete(&self, reference: &Reference) -> Result<bool, Error> {
        Ok(self.db.write().remove(reference).is_some())
    }

    fn link_base(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_download_delete_round_trip() {
        let driver = MemoryStoreDriver::new();
        let reference = Reference::from("abc");
        driver.put(&reference, b"hello").await.unwrap();
        assert_eq!(driver.download(&reference).await.unwrap(), Some(b"hello".to_vec()));
        assert!(driver.delete(&reference).await.unwrap());
        assert_eq!(driver.download(&reference).await.unwrap(), None);
        assert!(!driver.delete(&reference).await.unwrap());
    }
}
