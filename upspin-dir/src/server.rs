//! [`DirServer`]: the public face of the tree engine. Ties together a
//! per-owner [`Tree`], the access evaluator, the key server, and the store
//! server to implement the seven directory RPCs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use upspin_access::{can, owner_may_write_access, Right};
use upspin_keyserver::KeyServer;
use upspin_pack::Factotum;
use upspin_path::{Path, UserName};
use upspin_store::StoreServer;
use upspin_tree::{ListOutcome, LookupOutcome, Tree};
use upspin_types::{DirEntry, Error, Kind};

use crate::access::{
    governing_access, is_group_path, validate_group_file_eagerly, EntryFetcher, ACCESS_FILE_NAME,
};
use crate::flush::TreeFlushSink;
use crate::locks::TreeLocks;

/// Result of an operation that can stop mid-traversal at a link, surfaced
/// the same way [`upspin_tree::LookupOutcome`] does.
#[derive(Debug, Clone)]
pub enum Outcome {
    Entry(DirEntry),
    FollowLink(DirEntry),
}

struct Inner {
    log_root: PathBuf,
    store: Arc<StoreServer>,
    keys: Arc<KeyServer>,
    locks: TreeLocks,
    trees: RwLock<HashMap<UserName, Arc<Tree>>>,
    factotums: RwLock<HashMap<UserName, Arc<dyn Factotum>>>,
}

impl Inner {
    async fn open_tree(&self, user: &UserName) -> Result<Arc<Tree>, Error> {
        if let Some(tree) = self.trees.read().await.get(user) {
            return Ok(tree.clone());
        }
        let mut trees = self.trees.write().await;
        if let Some(tree) = trees.get(user) {
            return Ok(tree.clone());
        }
        let dir = self.log_root.join(user.to_string());
        let tree = Arc::new(Tree::open(user.clone(), dir).await?);
        trees.insert(user.clone(), tree.clone());
        Ok(tree)
    }
}

#[async_trait::async_trait]
impl EntryFetcher for Inner {
    async fn lookup_entry(&self, path: &Path) -> Result<Option<DirEntry>, Error> {
        let tree = self.open_tree(path.user()).await?;
        match tree.lookup(path).await {
            Ok(LookupOutcome::Entry { entry, .. }) => Ok(Some(entry)),
            // A link mid-traversal means the plain entry isn't there to read.
            Ok(LookupOutcome::FollowLink(_)) => Ok(None),
            Err(e) if e.kind == Kind::NotExist => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn signing_key(&self, user: &UserName) -> Result<ed25519_dalek::VerifyingKey, Error> {
        Ok(self.keys.lookup(user).await?.public_keys.signing)
    }
}

/// The directory server. Cheap to clone: it's an `Arc` handle shared by
/// every caller, the way a tonic service handle is.
#[derive(Clone)]
pub struct DirServer(Arc<Inner>);

impl DirServer {
    pub fn new(log_root: impl Into<PathBuf>, store: Arc<StoreServer>, keys: Arc<KeyServer>) -> Self {
        DirServer(Arc::new(Inner {
            log_root: log_root.into(),
            store,
            keys,
            locks: TreeLocks::new(),
            trees: RwLock::new(HashMap::new()),
            factotums: RwLock::new(HashMap::new()),
        }))
    }

    /// Registers the factotum a tree owner's flushes are signed with. Must
    /// be called before the first [`DirServer::flush`] for that user.
    pub async fn register_factotum(&self, user: UserName, factotum: Arc<dyn Factotum>) {
        self.0.factotums.write().await.insert(user, factotum);
    }

    /// Serializes every dirty directory for `user` to the store and
    /// re-signs it. Not called implicitly by `put`; a background task or
    /// an explicit client call drives it, per the tree engine's own flush
    /// being a separate, lazily-invoked step.
    pub async fn flush(&self, user: &UserName) -> Result<(), Error> {
        let tree = self.0.open_tree(user).await?;
        let factotum = self
            .0
            .factotums
            .read()
            .await
            .get(user)
            .cloned()
            .ok_or_else(|| Error::internal(format!("no factotum registered for {user}")))?;
        let sink = TreeFlushSink::new(self.0.store.clone(), factotum);
        tree.flush(&sink).await
    }

    fn group_loader(&self) -> crate::access::DirGroupLoader {
        crate::access::DirGroupLoader::new(self.0.clone(), self.0.store.clone())
    }

    /// Evaluates whether `caller` holds `right` on whatever `start_dir`'s
    /// governing `Access` file says, falling back to bare ownership when no
    /// `Access` file exists anywhere on the way up (a fresh tree, where the
    /// owner holds every right until they write one).
    pub(crate) async fn check_right(&self, caller: &UserName, right: Right, start_dir: &Path) -> Result<bool, Error> {
        match governing_access(self.0.as_ref(), &self.0.store, start_dir).await? {
            Some(access) => {
                let loader = self.group_loader();
                let result = can(caller, right, start_dir, &access, &loader)
                    .await
                    .map_err(|e| Error::invalid(e.to_string()))?;
                if !result.missing_groups.is_empty() {
                    tracing::debug!(
                        groups = ?result.missing_groups,
                        "group file(s) unavailable while evaluating access"
                    );
                }
                Ok(result.permitted)
            }
            None => Ok(caller == start_dir.user()),
        }
    }

    pub(crate) fn require(permitted: bool, path: &Path) -> Result<(), Error> {
        if permitted {
            Ok(())
        } else {
            Err(Error::not_exist(format!("{path}: does not exist")))
        }
    }

    /// The directory containing `path`'s own entry — where rights to
    /// create, overwrite, or delete `path` itself are governed from.
    pub(crate) fn parent_dir(path: &Path) -> Path {
        path.parent().unwrap_or_else(|| path.clone())
    }

    #[tracing::instrument(skip_all, err, fields(path = %path))]
    pub async fn lookup(&self, caller: &UserName, path: &Path) -> Result<Outcome, Error> {
        let tree = self.0.open_tree(path.user()).await?;
        let mut entry = match tree.lookup(path).await {
            Ok(LookupOutcome::Entry { entry, .. }) => entry,
            Ok(LookupOutcome::FollowLink(link)) => return Ok(Outcome::FollowLink(link)),
            Err(e) => return Err(e),
        };

        let start_dir = Self::parent_dir(path);
        let permitted = self.check_right(caller, Right::List, &start_dir).await?;
        Self::require(permitted, path)?;

        if !self.check_right(caller, Right::Read, &start_dir).await? {
            entry = entry.into_incomplete();
        }
        Ok(Outcome::Entry(entry))
    }

    #[tracing::instrument(skip_all, err, fields(path = %entry.name))]
    pub async fn put(&self, caller: &UserName, entry: DirEntry) -> Result<Outcome, Error> {
        let path = entry.name.clone();
        let owner = path.user().clone();
        let _guard = self.0.locks.lock(&owner).await;

        let tree = self.0.open_tree(&owner).await?;
        let existing = match tree.lookup(&path).await {
            Ok(LookupOutcome::Entry { entry, .. }) => Some(entry),
            Ok(LookupOutcome::FollowLink(link)) => return Ok(Outcome::FollowLink(link)),
            Err(e) if e.kind == Kind::NotExist => None,
            Err(e) => return Err(e),
        };

        if path.file_name() == Some(ACCESS_FILE_NAME) {
            if !owner_may_write_access(caller, &path) {
                return Err(Error::not_exist(format!("{path}: does not exist")));
            }
        } else {
            let required = if existing.is_some() { Right::Write } else { Right::Create };
            let permitted = self.check_right(caller, required, &Self::parent_dir(&path)).await?;
            Self::require(permitted, &path)?;
        }

        if is_group_path(&path) && !entry.attr.is_dir() {
            let writer_key = self.0.keys.lookup(&entry.writer).await?.public_keys.signing;
            validate_group_file_eagerly(&self.0.store, &writer_key, &entry).await?;
        }

        let stored = tree.put(&path, entry).await?;
        Ok(Outcome::Entry(stored))
    }

    /// Deleting an `Access` or `Group` file needs no explicit cache
    /// invalidation here: rights are re-evaluated fresh on every call
    /// rather than cached.
    #[tracing::instrument(skip_all, err, fields(path = %path))]
    pub async fn delete(&self, caller: &UserName, path: &Path) -> Result<Outcome, Error> {
        let owner = path.user().clone();
        let _guard = self.0.locks.lock(&owner).await;

        let permitted = self.check_right(caller, Right::Delete, &Self::parent_dir(path)).await?;
        Self::require(permitted, path)?;

        let tree = self.0.open_tree(&owner).await?;
        let removed = tree.delete(path).await?;
        Ok(Outcome::Entry(removed))
    }

    #[tracing::instrument(skip_all, err, fields(path = %path))]
    pub async fn make_directory(&self, caller: &UserName, path: &Path) -> Result<Outcome, Error> {
        let owner = path.user().clone();
        if path.is_root() && caller != &owner {
            return Err(Error::not_exist(format!("{path}: does not exist")));
        }
        let _guard = self.0.locks.lock(&owner).await;

        if !path.is_root() {
            let permitted = self.check_right(caller, Right::Create, &Self::parent_dir(path)).await?;
            Self::require(permitted, path)?;
        }

        let tree = self.0.open_tree(&owner).await?;
        let entry = DirEntry {
            name: path.clone(),
            signed_name: path.clone(),
            attr: upspin_types::Attr::DIRECTORY,
            packing: upspin_types::Packing::Plain,
            writer: caller.clone(),
            sequence: upspin_types::sequence::IGNORE,
            time: 0,
            blocks: vec![],
            packdata: vec![],
            link: None,
        };
        let stored = tree.put(path, entry).await?;
        Ok(Outcome::Entry(stored))
    }

    /// Returns the `Access` file's own entry governing `path`, or `None`
    /// if no `Access` file governs it (the owner's implicit rights apply).
    #[tracing::instrument(skip_all, err, fields(path = %path))]
    pub async fn which_access(&self, caller: &UserName, path: &Path) -> Result<Option<DirEntry>, Error> {
        let permitted = self.check_right(caller, Right::List, path).await?;
        Self::require(permitted, path)?;

        match governing_access(self.0.as_ref(), &self.0.store, path).await? {
            Some(access) => self.0.lookup_entry(&access.path).await,
            None => Ok(None),
        }
    }

    /// Lists the direct children of the directory at `path`, or follows a
    /// link encountered along the way.
    #[tracing::instrument(skip_all, err, fields(path = %path))]
    pub async fn list(&self, caller: &UserName, path: &Path) -> Result<Vec<Outcome>, Error> {
        let permitted = self.check_right(caller, Right::List, path).await?;
        Self::require(permitted, path)?;

        let tree = self.0.open_tree(path.user()).await?;
        match tree.list(path).await {
            Ok(ListOutcome::Entries(entries)) => Ok(entries.into_iter().map(Outcome::Entry).collect()),
            Ok(ListOutcome::FollowLink(link)) => Ok(vec![Outcome::FollowLink(link)]),
            Err(e) => Err(e),
        }
    }

    /// Reads one log record for `user` at `offset`, for [`crate::watch`].
    pub(crate) async fn read_log_at(
        &self,
        user: &UserName,
        offset: u64,
    ) -> Result<Option<(upspin_tree::LogEntry, u64)>, Error> {
        let tree = self.0.open_tree(user).await?;
        tree.read_log_at(offset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    use upspin_keyserver::{AdminPolicy, Authority, InMemoryKeyStore, NoSignup, UserRecord};
    use upspin_pack::InMemoryFactotum;
    use upspin_store::MemoryStoreDriver;
    use upspin_types::{sequence, Attr, BlockDescriptor, Endpoint, Location, Packing, Reference};

    struct AllowAllAdmin;
    impl AdminPolicy for AllowAllAdmin {
        fn is_admin(&self, _user: &UserName) -> bool {
            true
        }
    }

    async fn plain_entry(store: &StoreServer, path: &Path, writer: &UserName, contents: &[u8]) -> DirEntry {
        let reference = Reference::from(data_encoding::HEXLOWER.encode(&Sha256::digest(contents)));
        store.put(&reference, contents).await.unwrap();
        DirEntry {
            name: path.clone(),
            signed_name: path.clone(),
            attr: Attr::NONE,
            packing: Packing::Plain,
            writer: writer.clone(),
            sequence: sequence::IGNORE,
            time: 0,
            blocks: vec![BlockDescriptor {
                location: Location {
                    endpoint: Endpoint::in_process(),
                    reference,
                },
                offset: 0,
                size: contents.len() as u64,
                packdata: vec![],
            }],
            packdata: vec![],
            link: None,
        }
    }

    async fn setup() -> (DirServer, Arc<StoreServer>, Arc<KeyServer>, UserName, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StoreServer::new(Arc::new(MemoryStoreDriver::new())));
        let keys = Arc::new(KeyServer::new(
            Arc::new(InMemoryKeyStore::new()),
            Arc::new(AllowAllAdmin),
            Arc::new(NoSignup),
        ));
        let server = DirServer::new(dir.path(), store.clone(), keys.clone());

        let ann = UserName::parse("ann@example.com").unwrap();
        let factotum = InMemoryFactotum::generate();
        keys.put(
            &ann,
            UserRecord {
                name: ann.clone(),
                directory_endpoints: vec![],
                store_endpoints: vec![],
                public_keys: factotum.public_keys(),
            },
            Authority::Admin,
        )
        .await
        .unwrap();
        server.register_factotum(ann.clone(), Arc::new(factotum)).await;

        let root = Path::parse(&ann.to_string()).unwrap();
        server.make_directory(&ann, &root).await.unwrap();

        (server, store, keys, ann, dir)
    }

    #[tokio::test]
    async fn owner_can_put_lookup_and_delete_without_any_access_file() {
        let (server, store, _keys, ann, _tmp) = setup().await;
        let path = Path::parse("ann@example.com/doc.txt").unwrap();
        let entry = plain_entry(&store, &path, &ann, b"hello").await;

        server.put(&ann, entry).await.unwrap();
        match server.lookup(&ann, &path).await.unwrap() {
            Outcome::Entry(entry) => assert!(!entry.is_incomplete()),
            Outcome::FollowLink(_) => panic!("unexpected link"),
        }
        server.delete(&ann, &path).await.unwrap();
        assert_eq!(server.lookup(&ann, &path).await.unwrap_err().kind, Kind::NotExist);
    }

    #[tokio::test]
    async fn non_owner_denied_without_access_file_is_not_exist() {
        let (server, store, _keys, ann, _tmp) = setup().await;
        let path = Path::parse("ann@example.com/doc.txt").unwrap();
        let entry = plain_entry(&store, &path, &ann, b"hello").await;
        server.put(&ann, entry).await.unwrap();

        let bob = UserName::parse("bob@foo.com").unwrap();
        let err = server.lookup(&bob, &path).await.unwrap_err();
        assert_eq!(err.kind, Kind::NotExist);
    }

    #[tokio::test]
    async fn granting_read_and_list_lets_non_owner_lookup() {
        let (server, store, _keys, ann, _tmp) = setup().await;
        let bob = UserName::parse("bob@foo.com").unwrap();

        let access_path = Path::parse("ann@example.com/Access").unwrap();
        let access_entry = plain_entry(
            &store,
            &access_path,
            &ann,
            b"a: ann@example.com\nr,l: bob@foo.com\n",
        )
        .await;
        server.put(&ann, access_entry).await.unwrap();

        let doc_path = Path::parse("ann@example.com/doc.txt").unwrap();
        let doc_entry = plain_entry(&store, &doc_path, &ann, b"hello").await;
        server.put(&ann, doc_entry).await.unwrap();

        match server.lookup(&bob, &doc_path).await.unwrap() {
            Outcome::Entry(entry) => assert!(!entry.is_incomplete()),
            Outcome::FollowLink(_) => panic!("unexpected link"),
        }
    }

    #[tokio::test]
    async fn non_owner_cannot_write_access_file() {
        let (server, store, _keys, ann, _tmp) = setup().await;
        let bob = UserName::parse("bob@foo.com").unwrap();
        let access_path = Path::parse("ann@example.com/Access").unwrap();
        let entry = plain_entry(&store, &access_path, &bob, b"r: bob@foo.com\n").await;
        let err = server.put(&bob, entry).await.unwrap_err();
        assert_eq!(err.kind, Kind::NotExist);
    }

    #[tokio::test]
    async fn make_directory_root_requires_owner() {
        let (server, _store, _keys, ann, _tmp) = setup().await;
        let bob = UserName::parse("bob@foo.com").unwrap();
        let root = Path::parse(&ann.to_string()).unwrap();
        let err = server.make_directory(&bob, &root).await.unwrap_err();
        assert_eq!(err.kind, Kind::NotExist);
    }
}
