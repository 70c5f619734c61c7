//! Loads `Access`/`Group` file content out of the tree engine for the
//! evaluator: [`DirGroupLoader`] implements `upspin_access::GroupLoader`,
//! and [`governing_access`] walks from a path up to the root looking for
//! the nearest `Access` file, per spec §4.4's `WhichAccess`.

use std::sync::Arc;

use async_trait::async_trait;
use ed25519_dalek::{Signature, VerifyingKey};

use upspin_access::{AccessFile, GroupFile, GroupLoader};
use upspin_pack::{packer_for, Factotum, PublicKeys};
use upspin_path::{Path, UserName};
use upspin_store::{GetResult, StoreServer};
use upspin_types::{DirEntry, Error, Packing};

pub const ACCESS_FILE_NAME: &str = "Access";

/// Narrow seam the group/access loader needs from the directory server:
/// raw tree lookup (no rights check — loading Access/Group content for
/// evaluation is itself how rights get decided) and a writer's public
/// signing key.
#[async_trait]
pub trait EntryFetcher: Send + Sync {
    async fn lookup_entry(&self, path: &Path) -> Result<Option<DirEntry>, Error>;
    async fn signing_key(&self, user: &UserName) -> Result<VerifyingKey, Error>;
}

/// Stands in for a reader's key material when unpacking a block that, by
/// construction, never needs one: `plain` has no crypto at all, and
/// `eeintegrity`'s `unpack` ignores its `factotum` argument entirely. Both
/// methods panic if ever actually invoked, which would mean an `Access` or
/// `Group` file was packed with `ee`, a configuration this crate rejects
/// before reaching here.
struct NullFactotum;

impl Factotum for NullFactotum {
    fn public_keys(&self) -> PublicKeys {
        unreachable!("NullFactotum is never asked for its own keys")
    }
    fn sign(&self, _message: &[u8]) -> Signature {
        unreachable!("NullFactotum never signs")
    }
    fn ecdh_shared_secret(&self, _ephemeral_pub: &p256::PublicKey) -> [u8; 32] {
        unreachable!("NullFactotum never unwraps a key")
    }
}

/// Fetches `path`'s entry, downloads its blocks, and unpacks them to
/// plaintext. Returns `Ok(None)` if the path does not exist, which the
/// `GroupLoader` contract treats the same as "not found yet".
async fn load_plaintext(
    fetcher: &dyn EntryFetcher,
    store: &StoreServer,
    path: &Path,
) -> Result<Option<Vec<u8>>, Error> {
    let Some(entry) = fetcher.lookup_entry(path).await? else {
        return Ok(None);
    };
    if entry.packing == Packing::Ee {
        return Err(Error::invalid(format!(
            "{path} is packed with `ee`; Access/Group files must be world-readable"
        )));
    }

    let mut block_bytes = Vec::with_capacity(entry.blocks.len());
    for block in &entry.blocks {
        match store.get(&block.location.reference).await? {
            GetResult::Bytes(bytes) => block_bytes.push(bytes),
            GetResult::AlternateLocations(_) => {
                return Err(Error::internal(format!(
                    "{path}: alternate locations are not followed for Access/Group content"
                )))
            }
        }
    }

    let writer_key = fetcher.signing_key(&entry.writer).await?;
    let packer = packer_for(entry.packing);
    let plaintext = packer
        .unpack(&entry, &NullFactotum, &writer_key, &block_bytes)
        .await?;
    Ok(Some(plaintext))
}

/// Resolves a bare group token to a [`Path`] by parsing it as a full path,
/// per spec §6: "recursive references by full path".
fn resolve_group(token: &str) -> Option<Path> {
    Path::parse(token).ok()
}

pub struct DirGroupLoader {
    fetcher: Arc<dyn EntryFetcher>,
    store: Arc<StoreServer>,
}

impl DirGroupLoader {
    pub fn new(fetcher: Arc<dyn EntryFetcher>, store: Arc<StoreServer>) -> Self {
        DirGroupLoader { fetcher, store }
    }
}

#[async_trait]
impl GroupLoader for DirGroupLoader {
    async fn load_group(&self, path: &Path) -> Result<Option<String>, String> {
        match load_plaintext(self.fetcher.as_ref(), &self.store, path).await {
            Ok(Some(bytes)) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| e.to_string()),
            Ok(None) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// True if `path`'s first element is `Group`, the directory convention
/// under which Group files live.
pub fn is_group_path(path: &Path) -> bool {
    path.elements().first().map(String::as_str) == Some("Group")
}

/// Walks upward from `start_dir` (checked first) to the user's root,
/// returning the nearest directory's parsed `Access` file, or `None` if no
/// directory on the way up has one (in which case only the tree owner
/// holds any right). Callers pick `start_dir`: a path's own parent, to
/// check rights on an operation touching that path, or the path itself,
/// to check rights on listing or entering that directory.
pub async fn governing_access(
    fetcher: &dyn EntryFetcher,
    store: &StoreServer,
    start_dir: &Path,
) -> Result<Option<AccessFile>, Error> {
    let mut dir = start_dir.clone();
    loop {
        let access_path = dir
            .join(ACCESS_FILE_NAME)
            .map_err(|e| Error::internal(e.to_string()))?;
        if let Some(bytes) = load_plaintext(fetcher, store, &access_path).await? {
            let text = String::from_utf8(bytes)
                .map_err(|e| Error::invalid(format!("{access_path}: not valid UTF-8: {e}")))?;
            let access = AccessFile::parse(&access_path, &text, resolve_group)
                .map_err(|e| Error::invalid(e.to_string()))?;
            return Ok(Some(access));
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Ok(None),
        }
    }
}

/// Parses `entry`'s content as a `Group` file and discards the result,
/// surfacing any syntax error to the caller before the `Put` that wrote it
/// is allowed to land: spec's "parsed eagerly to validate". `entry` must
/// already be stored (its blocks resolvable) but need not belong to any
/// tree yet.
pub async fn validate_group_file_eagerly(
    store: &StoreServer,
    writer_key: &VerifyingKey,
    entry: &DirEntry,
) -> Result<(), Error> {
    if entry.packing == Packing::Ee {
        return Err(Error::invalid(format!(
            "{}: Group files must be world-readable, not `ee`-packed",
            entry.name
        )));
    }

    let mut block_bytes = Vec::with_capacity(entry.blocks.len());
    for block in &entry.blocks {
        match store.get(&block.location.reference).await? {
            GetResult::Bytes(bytes) => block_bytes.push(bytes),
            GetResult::AlternateLocations(_) => {
                return Err(Error::internal(format!(
                    "{}: alternate locations are not followed for Group content",
                    entry.name
                )))
            }
        }
    }

    let packer = packer_for(entry.packing);
    let plaintext = packer
        .unpack(entry, &NullFactotum, writer_key, &block_bytes)
        .await?;
    let text = String::from_utf8(plaintext).map_err(|e| Error::invalid(e.to_string()))?;
    GroupFile::parse(&entry.name, &text, resolve_group).map_err(|e| Error::invalid(e.to_string()))?;
    Ok(())
}
