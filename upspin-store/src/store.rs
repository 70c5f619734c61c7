use std::sync::Arc;

use sha2::{Digest, Sha256};

use upspin_types::{Error, Location, Reference};

use crate::driver::StoreDriver;

/// The result of a [`StoreServer::get`]: either the blob's bytes, or a
/// redirect to other locations that might hold it.
pub enum GetResult {
    Bytes(Vec<u8>),
    AlternateLocations(Vec<Location>),
}

/// Content-hash verification and idempotent-delete semantics layered on
/// top of a "dumb" [`StoreDriver`] — mirrors how `castore`'s
/// `BlobService` implementations stay thin while the hash contract is
/// upheld by the caller computing digests as it streams.
pub struct StoreServer {
    driver: Arc<dyn StoreDriver>,
}

fn sha256_hex(data: &[u8]) -> String {
    data_encoding::HEXLOWER.encode(&Sha256::digest(data))
}

impl StoreServer {
    pub fn new(driver: Arc<dyn StoreDriver>) -> Self {
        StoreServer { driver }
    }

    /// Commits `data` under `reference`, first checking that
    /// `hash(data) == reference`, per §4.5's `Put` contract.
    #[tracing::instrument(skip_all, err, fields(reference = %reference))]
    pub async fn put(&self, reference: &Reference, data: &[u8]) -> Result<(), Error> {
        let digest = sha256_hex(data);
        if digest != reference.as_str() {
            return Err(Error::invalid(format!(
                "reference {} does not match hash {digest} of the supplied data",
                reference.as_str()
            )));
        }
        self.driver.put(reference, data).await
    }

    /// Fetches `reference`. This single-driver implementation never
    /// redirects: a present blob returns [`GetResult::Bytes`], an absent
    /// one is a `NotExist` error rather than an empty alternate-location
    /// list, since there is no second store to point the caller at.
    #[tracing::instrument(skip_all, err, fields(reference = %reference))]
    pub async fn get(&self, reference: &Reference) -> Result<GetResult, Error> {
        match self.driver.download(reference).await? {
            Some(bytes) => Ok(GetResult::Bytes(bytes)),
            None => Err(Error::not_exist(format!("no such reference: {reference}"))),
        }
    }

    /// Removes `reference`. Deleting an absent blob is not an error at
    /// the driver layer, but is surfaced here as `NotExist` so callers get
    /// a uniform idempotent-delete contract with the rest of the core.
    #[tracing::instrument(skip_all, err, fields(reference = %reference))]
    pub async fn delete(&self, reference: &Reference) -> Result<(), Error> {
        if self.driver.delete(reference).await? {
            Ok(())
        } else {
            Err(Error::not_exist(format!("no such reference: {reference}")))
        }
    }

    pub fn link_base(&self) -> Option<String> {
        self.driver.link_base()
    }
}
