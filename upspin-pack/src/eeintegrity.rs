use crate::block::{chunk, DEFAULT_BLOCK_SIZE};
use crate::factotum::{self, Factotum};
use crate::packer::{sha256_hex, PackedBlock, PackedFile, Packer, ReaderKey};
use async_trait::async_trait;
use ed25519_dalek::{Signature, VerifyingKey};
use upspin_path::Path;
use upspin_types::{DirEntry, Error, Packing};

/// Unencrypted but signed with the writer's private key, so integrity and
/// origin can be verified without granting any reader a decryption key.
pub struct EeIntegrityPacker;

fn signing_message(signed_name: &Path, time: u64, block_refs: &[String]) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.extend_from_slice(signed_name.to_string().as_bytes());
    msg.extend_from_slice(&time.to_le_bytes());
    for r in block_refs {
        msg.extend_from_slice(r.as_bytes());
    }
    msg
}

#[async_trait]
impl Packer for EeIntegrityPacker {
    fn packing(&self) -> Packing {
        Packing::EeIntegrity
    }

    #[tracing::instrument(skip_all, err, fields(name = %name))]
    async fn pack(
        &self,
        factotum: &dyn Factotum,
        name: &Path,
        time: u64,
        data: &[u8],
        _readers: &[ReaderKey],
    ) -> Result<PackedFile, Error> {
        let blocks: Vec<PackedBlock> = chunk(data, DEFAULT_BLOCK_SIZE)
            .into_iter()
            .map(|b| PackedBlock {
                bytes: b.to_vec(),
                reference: sha256_hex(b),
            })
            .collect();

        let refs: Vec<String> = blocks.iter().map(|b| b.reference.to_string()).collect();
        let signature = factotum.sign(&signing_message(name, time, &refs));

        Ok(PackedFile {
            blocks,
            packdata: signature.to_bytes().to_vec(),
        })
    }

    async fn unpack(
        &self,
        entry: &DirEntry,
        _factotum: &dyn Factotum,
        writer_key: &VerifyingKey,
        block_bytes: &[Vec<u8>],
    ) -> Result<Vec<u8>, Error> {
        let refs: Vec<String> = entry
            .blocks
            .iter()
            .map(|b| b.location.reference.to_string())
            .collect();
        let sig_bytes: [u8; 64] = entry
            .packdata
            .as_slice()
            .try_into()
            .map_err(|_| Error::cannot_decrypt("malformed signature"))?;
        let signature = Signature::from_bytes(&sig_bytes);

        if !factotum::verify(
            writer_key,
            &signing_message(&entry.signed_name, entry.time, &refs),
            &signature,
        ) {
            return Err(Error::cannot_decrypt(format!(
                "signature verification failed for {} (writer {})",
                entry.name, entry.writer
            )));
        }

        Ok(block_bytes.concat())
    }

    async fn share(
        &self,
        entry: &DirEntry,
        _factotum: &dyn Factotum,
        _readers: &[ReaderKey],
    ) -> Result<DirEntry, Error> {
        // The signature covers name/time/block-hashes, not the reader set;
        // nothing to rewrap.
        Ok(entry.clone())
    }
}
