use crate::block::{chunk, DEFAULT_BLOCK_SIZE};
use crate::factotum::Factotum;
use crate::packer::{sha256_hex, PackedBlock, PackedFile, Packer, ReaderKey};
use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use upspin_path::Path;
use upspin_types::{DirEntry, Error, Packing};

/// Identity transform: no encryption, no signature, no key wrapping.
/// Reference is the hash of the plaintext block. Used for `Access`/`Group`
/// files, which must be world-readable to enable permission checks.
pub struct PlainPacker;

#[async_trait]
impl Packer for PlainPacker {
    fn packing(&self) -> Packing {
        Packing::Plain
    }

    async fn pack(
        &self,
        _factotum: &dyn Factotum,
        _name: &Path,
        _time: u64,
        data: &[u8],
        _readers: &[ReaderKey],
    ) -> Result<PackedFile, Error> {
        let blocks = chunk(data, DEFAULT_BLOCK_SIZE)
            .into_iter()
            .map(|b| PackedBlock {
                bytes: b.to_vec(),
                reference: sha256_hex(b),
            })
            .collect();
        Ok(PackedFile {
            blocks,
            packdata: Vec::new(),
        })
    }

    async fn unpack(
        &self,
        _entry: &DirEntry,
        _factotum: &dyn Factotum,
        _writer_key: &VerifyingKey,
        block_bytes: &[Vec<u8>],
    ) -> Result<Vec<u8>, Error> {
        Ok(block_bytes.concat())
    }

    async fn share(
        &self,
        entry: &DirEntry,
        _factotum: &dyn Factotum,
        _readers: &[ReaderKey],
    ) -> Result<DirEntry, Error> {
        // Nothing is encrypted for a reader set; sharing is a no-op.
        Ok(entry.clone())
    }
}
