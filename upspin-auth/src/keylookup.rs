use std::sync::Arc;

use async_trait::async_trait;

use upspin_keyserver::KeyServer;
use upspin_pack::PublicKeys;
use upspin_path::UserName;
use upspin_types::Error;

/// The seam through which the auth handshake fetches a user's public key
/// (spec §4.7 step 3: "fetches the user's public key via the key-server
/// collaborator"). Kept as a trait, rather than a hard dependency on
/// `upspin_keyserver::KeyServer`, for tests that want fixed keys without
/// standing up a key store.
#[async_trait]
pub trait PublicKeyLookup: Send + Sync {
    async fn public_keys(&self, user: &UserName) -> Result<PublicKeys, Error>;
}

/// Adapts a real [`KeyServer`] to [`PublicKeyLookup`].
pub struct KeyServerLookup(pub Arc<KeyServer>);

#[async_trait]
impl PublicKeyLookup for KeyServerLookup {
    async fn public_keys(&self, user: &UserName) -> Result<PublicKeys, Error> {
        Ok(self.0.lookup(user).await?.public_keys)
    }
}
