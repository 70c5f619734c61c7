//! The client façade: one `Client` object wiring a directory server, a
//! store server and a key server behind `put`/`get`/`lookup`/
//! `make_directory`/`glob`/`delete`/`share`, doing the packing/unpacking
//! the directory server itself never touches.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use upspin_access::{AccessFile, Principal, Right};
use upspin_dir::{DirServer, Outcome};
use upspin_keyserver::KeyServer;
use upspin_pack::{packer_for, Factotum, ReaderKey};
use upspin_path::{Path, UserName};
use upspin_store::{GetResult, StoreServer};
use upspin_types::{
    sequence, Attr, BlockDescriptor, DirEntry, Endpoint, Error, Location, Packing,
};

/// One user's view of the namespace: a directory server, a store server
/// and a key server, plus the identity packing/signing runs under.
pub struct Client {
    dir: DirServer,
    store: Arc<StoreServer>,
    keys: Arc<KeyServer>,
    user: UserName,
    factotum: Arc<dyn Factotum>,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the epoch")
        .as_secs()
}

fn as_entry(outcome: Outcome) -> Result<DirEntry, Error> {
    match outcome {
        Outcome::Entry(entry) => Ok(entry),
        Outcome::FollowLink(link) => Err(Error::broken_link(link.name.to_string())),
    }
}

impl Client {
    pub fn new(
        dir: DirServer,
        store: Arc<StoreServer>,
        keys: Arc<KeyServer>,
        user: UserName,
        factotum: Arc<dyn Factotum>,
    ) -> Self {
        Client {
            dir,
            store,
            keys,
            user,
            factotum,
        }
    }

    pub fn user(&self) -> &UserName {
        &self.user
    }

    /// Downloads every block for `entry` from the store, in block order.
    async fn fetch_blocks(&self, entry: &DirEntry) -> Result<Vec<Vec<u8>>, Error> {
        let mut block_bytes = Vec::with_capacity(entry.blocks.len());
        for block in &entry.blocks {
            match self.store.get(&block.location.reference).await? {
                GetResult::Bytes(bytes) => block_bytes.push(bytes),
                GetResult::AlternateLocations(_) => {
                    return Err(Error::internal(format!(
                        "{}: alternate locations are not followed by this client",
                        entry.name
                    )))
                }
            }
        }
        Ok(block_bytes)
    }

    /// Reads `entry`'s content as plaintext; used only for `Access`/`Group`
    /// files, which are never packed with `ee`.
    async fn fetch_plain_text(&self, entry: &DirEntry) -> Result<String, Error> {
        if entry.packing == Packing::Ee {
            return Err(Error::invalid(format!(
                "{}: packed with `ee`, not a readable Access/Group file",
                entry.name
            )));
        }
        let block_bytes = self.fetch_blocks(entry).await?;
        let writer_key = self.keys.lookup(&entry.writer).await?.public_keys.signing;
        let packer = packer_for(entry.packing);
        let plaintext = packer
            .unpack(entry, self.factotum.as_ref(), &writer_key, &block_bytes)
            .await?;
        String::from_utf8(plaintext).map_err(|e| Error::invalid(e.to_string()))
    }

    /// The readers a new or rewrapped write to `path` should wrap keys for:
    /// the owner, plus every user named directly (not via `*@domain` or a
    /// `Group` file) in the `read` rule of `path`'s governing `Access` file.
    /// Resolving group membership would need the same recursive expansion
    /// `upspin-access`'s evaluator keeps private; this client only follows
    /// direct `user@domain` entries, a conservative subset of who the
    /// directory server itself would ultimately let read the file.
    async fn readers_for(&self, path: &Path) -> Result<Vec<ReaderKey>, Error> {
        let mut users = vec![path.user().clone()];

        if let Some(access_entry) = self.dir.which_access(&self.user, path).await? {
            let text = self.fetch_plain_text(&access_entry).await?;
            let access = AccessFile::parse(&access_entry.name, &text, |_| None)
                .map_err(|e| Error::invalid(e.to_string()))?;
            for principal in access.principals_for(Right::Read) {
                if let Principal::User(user) = principal {
                    if !users.contains(user) {
                        users.push(user.clone());
                    }
                }
            }
        }

        let mut readers = Vec::with_capacity(users.len());
        for user in users {
            let record = self.keys.lookup(&user).await?;
            readers.push(ReaderKey {
                user,
                ecdh: record.public_keys.ecdh,
            });
        }
        Ok(readers)
    }

    /// Packs `contents` under `packing`, stores its blocks, and writes the
    /// resulting entry at `path`.
    #[tracing::instrument(skip(self, contents), err, fields(path = %path))]
    pub async fn put(&self, path: &Path, packing: Packing, contents: &[u8]) -> Result<DirEntry, Error> {
        let readers = self.readers_for(path).await?;
        let time = now();
        let packer = packer_for(packing);
        let packed = packer
            .pack(self.factotum.as_ref(), path, time, contents, &readers)
            .await?;

        let mut blocks = Vec::with_capacity(packed.blocks.len());
        let mut offset = 0u64;
        for block in packed.blocks {
            self.store.put(&block.reference, &block.bytes).await?;
            let size = block.bytes.len() as u64;
            blocks.push(BlockDescriptor {
                location: Location {
                    endpoint: Endpoint::in_process(),
                    reference: block.reference,
                },
                offset,
                size,
                packdata: vec![],
            });
            offset += size;
        }

        let entry = DirEntry {
            name: path.clone(),
            signed_name: path.clone(),
            attr: Attr::NONE,
            packing,
            writer: self.user.clone(),
            sequence: sequence::IGNORE,
            time,
            blocks,
            packdata: packed.packdata,
            link: None,
        };
        as_entry(self.dir.put(&self.user, entry).await?)
    }

    /// Looks up `path`, downloads its blocks and returns the decrypted
    /// plaintext alongside the entry it came from.
    #[tracing::instrument(skip(self), err, fields(path = %path))]
    pub async fn get(&self, path: &Path) -> Result<(DirEntry, Vec<u8>), Error> {
        let entry = as_entry(self.dir.lookup(&self.user, path).await?)?;
        if entry.is_incomplete() {
            return Err(Error::permission(format!("{path}: no read access")));
        }
        let block_bytes = self.fetch_blocks(&entry).await?;
        let writer_key = self.keys.lookup(&entry.writer).await?.public_keys.signing;
        let packer = packer_for(entry.packing);
        let plaintext = packer
            .unpack(&entry, self.factotum.as_ref(), &writer_key, &block_bytes)
            .await?;
        Ok((entry, plaintext))
    }

    pub async fn lookup(&self, path: &Path) -> Result<Outcome, Error> {
        self.dir.lookup(&self.user, path).await
    }

    pub async fn delete(&self, path: &Path) -> Result<DirEntry, Error> {
        as_entry(self.dir.delete(&self.user, path).await?)
    }

    pub async fn make_directory(&self, path: &Path) -> Result<DirEntry, Error> {
        as_entry(self.dir.make_directory(&self.user, path).await?)
    }

    pub async fn glob(&self, pattern: &str) -> Result<Vec<Outcome>, Error> {
        self.dir.glob(&self.user, pattern).await
    }

    pub async fn list(&self, path: &Path) -> Result<Vec<Outcome>, Error> {
        self.dir.list(&self.user, path).await
    }

    pub async fn which_access(&self, path: &Path) -> Result<Option<DirEntry>, Error> {
        self.dir.which_access(&self.user, path).await
    }

    /// Rewraps `path`'s per-file key for its current reader set plus
    /// `new_readers`, without re-encrypting block content.
    #[tracing::instrument(skip(self), err, fields(path = %path))]
    pub async fn share(&self, path: &Path, new_readers: &[UserName]) -> Result<DirEntry, Error> {
        let entry = as_entry(self.dir.lookup(&self.user, path).await?)?;
        let mut readers = self.readers_for(path).await?;
        for user in new_readers {
            if readers.iter().any(|r| &r.user == user) {
                continue;
            }
            let record = self.keys.lookup(user).await?;
            readers.push(ReaderKey {
                user: user.clone(),
                ecdh: record.public_keys.ecdh,
            });
        }

        let packer = packer_for(entry.packing);
        let reshared = packer.share(&entry, self.factotum.as_ref(), &readers).await?;
        as_entry(self.dir.put(&self.user, reshared).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upspin_keyserver::{AdminPolicy, Authority, InMemoryKeyStore, NoSignup, UserRecord};
    use upspin_pack::InMemoryFactotum;
    use upspin_store::MemoryStoreDriver;

    struct AllowAllAdmin;
    impl AdminPolicy for AllowAllAdmin {
        fn is_admin(&self, _user: &UserName) -> bool {
            true
        }
    }

    async fn new_client(log_root: &std::path::Path, user: &str) -> Client {
        let store = Arc::new(StoreServer::new(Arc::new(MemoryStoreDriver::new())));
        let keys = Arc::new(KeyServer::new(
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(AllowAllAdmin),
            Arc::new(NoSignup),
        ));
        let dir = DirServer::new(log_root, store.clone(), keys.clone());
        let user = UserName::parse(user).unwrap();
        let factotum = Arc::new(InMemoryFactotum::generate());
        keys.put(
            &user,
            UserRecord {
                name: user.clone(),
                directory_endpoints: vec![],
                store_endpoints: vec![],
                public_keys: factotum.public_keys(),
            },
            Authority::Admin,
        )
        .await
        .unwrap();
        dir.register_factotum(user.clone(), factotum.clone()).await;
        let client = Client::new(dir, store, keys, user.clone(), factotum);
        let root = Path::parse(&user.to_string()).unwrap();
        client.make_directory(&root).await.unwrap();
        client
    }

    #[tokio::test]
    async fn put_then_get_round_trips_plaintext() {
        let tmp = tempfile::tempdir().unwrap();
        let client = new_client(tmp.path(), "ann@example.com").await;

        let path = Path::parse("ann@example.com/notes.txt").unwrap();
        client.put(&path, Packing::EeIntegrity, b"hello, upspin").await.unwrap();

        let (entry, contents) = client.get(&path).await.unwrap();
        assert_eq!(contents, b"hello, upspin");
        assert_eq!(entry.packing, Packing::EeIntegrity);
    }

    #[tokio::test]
    async fn delete_then_lookup_reports_not_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let client = new_client(tmp.path(), "ann@example.com").await;

        let path = Path::parse("ann@example.com/notes.txt").unwrap();
        client.put(&path, Packing::Plain, b"hello").await.unwrap();
        client.delete(&path).await.unwrap();

        let err = client.lookup(&path).await.unwrap_err();
        assert_eq!(err.kind, upspin_types::Kind::NotExist);
    }
}
