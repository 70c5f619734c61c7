use crate::factotum::Factotum;
use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use p256::PublicKey as EcdhPublicKey;
use upspin_path::{Path, UserName};
use upspin_types::{DirEntry, Error, Packing, Reference};

/// A block's ciphertext (or plaintext, for `plain`) plus the content
/// reference the store will key it by.
#[derive(Debug, Clone)]
pub struct PackedBlock {
    pub bytes: Vec<u8>,
    pub reference: Reference,
}

/// The result of packing a file's contents: one [`PackedBlock`] per block,
/// plus the entry-level `Packdata` (wrapped keys, signature, or HMAC,
/// depending on the packing).
#[derive(Debug, Clone)]
pub struct PackedFile {
    pub blocks: Vec<PackedBlock>,
    pub packdata: Vec<u8>,
}

/// A reader's public key material, as the directory server would have
/// looked it up via the key-server collaborator after evaluating access.
#[derive(Debug, Clone)]
pub struct ReaderKey {
    pub user: UserName,
    pub ecdh: EcdhPublicKey,
}

/// One packing scheme: encrypt-and-sign on write, verify-and-decrypt on
/// read, and rewrap-without-reread on an access change.
#[async_trait]
pub trait Packer: Send + Sync {
    fn packing(&self) -> Packing;

    /// Packs `data` for `name`, producing per-block ciphertext/reference
    /// pairs and the entry's `Packdata`. `readers` is the owner plus every
    /// user the access evaluator found to have `read` on `name`'s
    /// directory at the time of the write.
    async fn pack(
        &self,
        factotum: &dyn Factotum,
        name: &Path,
        time: u64,
        data: &[u8],
        readers: &[ReaderKey],
    ) -> Result<PackedFile, Error>;

    /// Verifies `entry`'s signature under `writer_key` and decrypts its
    /// blocks, given their ciphertext already fetched from the store in
    /// block order. `factotum` is the reader's own key material, used to
    /// unwrap the per-file symmetric key for packings that wrap one.
    async fn unpack(
        &self,
        entry: &DirEntry,
        factotum: &dyn Factotum,
        writer_key: &VerifyingKey,
        block_bytes: &[Vec<u8>],
    ) -> Result<Vec<u8>, Error>;

    /// Rewrites only `Packdata` for a new reader set, without touching
    /// block contents. `factotum` is the writer's key material (needed to
    /// unwrap the existing per-file key before rewrapping it).
    async fn share(
        &self,
        entry: &DirEntry,
        factotum: &dyn Factotum,
        readers: &[ReaderKey],
    ) -> Result<DirEntry, Error>;
}

pub(crate) fn sha256_hex(data: &[u8]) -> Reference {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(data);
    Reference::from(data_encoding::HEXLOWER.encode(&digest))
}
