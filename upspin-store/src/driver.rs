use async_trait::async_trait;
use upspin_types::{Error, Reference};

/// The contract a storage backend (disk, cloud bucket, in-process map)
/// implements. The [`crate::StoreServer`] layers content-hash
/// verification and idempotent-delete semantics on top of a driver;
/// drivers themselves are dumb key/value stores keyed by [`Reference`].
#[async_trait]
pub trait StoreDriver: Send + Sync {
    /// Fetches the bytes stored under `reference`, or `None` if absent.
    async fn download(&self, reference: &Reference) -> Result<Option<Vec<u8>>, Error>;

    /// Stores `data` under `reference`, overwriting any existing value.
    async fn put(&self, reference: &Reference, data: &[u8]) -> Result<(), Error>;

    /// Removes `reference`. Callers (not drivers) are responsible for the
    /// "missing → `NotExist`" contract; a driver simply reports whether it
    /// held the key.
    async fn delete(&self, reference: &Reference) -> Result<bool, Error>;

    /// A base URL the store may hand to clients for direct downloads, or
    /// `None` if this driver has no such public endpoint.
    fn link_base(&self) -> Option<String>;
}
