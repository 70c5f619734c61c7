use crate::block::{chunk, DEFAULT_BLOCK_SIZE};
use crate::factotum::Factotum;
use crate::packer::{sha256_hex, PackedBlock, PackedFile, Packer, ReaderKey};
use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use upspin_path::Path;
use upspin_types::{DirEntry, Error, Packing};

/// Reversible, human-readable packing used only in tests: blocks are
/// stored with every byte XORed against a fixed constant, so fixtures can
/// assert on the transform happening without standing up real key
/// material. Never used outside `#[cfg(test)]` code.
pub struct DebugPacker;

const XOR_CONSTANT: u8 = 0xaa;

fn toggle(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b ^ XOR_CONSTANT).collect()
}

#[async_trait]
impl Packer for DebugPacker {
    fn packing(&self) -> Packing {
        Packing::Debug
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
            .map(|b| {
                let bytes = toggle(b);
                PackedBlock {
                    reference: sha256_hex(&bytes),
                    bytes,
                }
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
        Ok(block_bytes.iter().flat_map(|b| toggle(b)).collect())
    }

    async fn share(
        &self,
        entry: &DirEntry,
        _factotum: &dyn Factotum,
        _readers: &[ReaderKey],
    ) -> Result<DirEntry, Error> {
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factotum::InMemoryFactotum;

    #[tokio::test]
    async fn round_trips_and_actually_transforms_bytes() {
        let packer = DebugPacker;
        let f = InMemoryFactotum::generate();
        let name = Path::parse("ann@example.com/notes").unwrap();
        let packed = packer.pack(&f, &name, 0, b"plaintext", &[]).await.unwrap();

        assert_ne!(packed.blocks[0].bytes, b"plaintext");

        let bytes: Vec<Vec<u8>> = packed.blocks.iter().map(|b| b.bytes.clone()).collect();
        let entry = DirEntry {
            name: name.clone(),
            signed_name: name.clone(),
            attr: upspin_types::Attr::NONE,
            packing: Packing::Debug,
            writer: name.user().clone(),
            sequence: upspin_types::sequence::BASE,
            time: 0,
            blocks: vec![],
            packdata: vec![],
            link: None,
        };
        let out = packer
            .unpack(&entry, &f, &f.public_keys().signing, &bytes)
            .await
            .unwrap();
        assert_eq!(out, b"plaintext");
    }
}
