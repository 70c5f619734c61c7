use async_trait::async_trait;

use upspin_path::UserName;
use upspin_types::Error;

use crate::record::UserRecord;

/// The contract a key-record backend implements: a dumb map from user
/// name to record, with no policy. [`crate::KeyServer`] layers the
/// self-write/admin/signup policy on top, mirroring how
/// `upspin_store::StoreServer` layers hash verification on top of a
/// `StoreDriver`.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get(&self, user: &UserName) -> Result<Option<UserRecord>, Error>;
    async fn put(&self, record: &UserRecord) -> Result<(), Error>;
}
