use std::sync::Arc;

use async_trait::async_trait;

use upspin_path::UserName;
use upspin_store::StoreDriver;
use upspin_types::{Error, Reference};

use crate::keystore::KeyStore;
use crate::record::{marshal, unmarshal, UserRecord};

/// A durable key store backed directly by a [`StoreDriver`]. Keyed by the
/// user name itself rather than a content hash — this bypasses
/// `upspin_store::StoreServer`'s hash-verification wrapper by talking to
/// the driver directly, the same role the driver plays for any
/// non-content-addressed keyed blob.
pub struct DurableKeyStore {
    driver: Arc<dyn StoreDriver>,
}

impl DurableKeyStore {
    pub fn new(driver: Arc<dyn StoreDriver>) -> Self {
        DurableKeyStore { driver }
    }

    fn key_for(user: &UserName) -> Reference {
        Reference::new(format!("keyserver/user/{user}"))
    }
}

#[async_trait]
impl KeyStore for DurableKeyStore {
    #[tracing::instrument(skip_all, err, fields(user = %user))]
    async fn get(&self, user: &UserName) -> Result<Option<UserRecord>, Error> {
        match self.driver.download(&Self::key_for(user)).await? {
            Some(bytes) => Ok(Some(unmarshal(&bytes)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip_all, err, fields(user = %record.name))]
    async fn put(&self, record: &UserRecord) -> Result<(), Error> {
        let bytes = marshal(record);
        self.driver.put(&Self::key_for(&record.name), &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::SecretKey as EcdhSecretKey;
    use rand::rngs::OsRng;
    use upspin_pack::PublicKeys;
    use upspin_store::MemoryStoreDriver;

    fn sample_record(name: &str) -> UserRecord {
        UserRecord {
            name: UserName::parse(name).unwrap(),
            directory_endpoints: vec![],
            store_endpoints: vec![],
            public_keys: PublicKeys {
                signing: ed25519_dalek::SigningKey::generate(&mut OsRng).verifying_key(),
                ecdh: EcdhSecretKey::random(&mut OsRng).public_key(),
            },
        }
    }

    #[tokio::test]
    async fn round_trips_through_a_store_driver() {
        let store = DurableKeyStore::new(Arc::new(MemoryStoreDriver::new()));
        let record = sample_record("ann@example.com");

        assert!(store.get(&record.name).await.unwrap().is_none());
        store.put(&record).await.unwrap();

        let fetched = store.get(&record.name).await.unwrap().unwrap();
        assert_eq!(fetched.name, record.name);
    }
}
