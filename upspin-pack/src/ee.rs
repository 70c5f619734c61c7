//! End-to-end encrypted packing: a fresh per-file symmetric key encrypts
//! every block, and is ECDH-wrapped for every intended reader.

use crate::block::{chunk, DEFAULT_BLOCK_SIZE};
use crate::factotum::{self, ecdh_key_hash, Factotum};
use crate::packer::{sha256_hex, PackedBlock, PackedFile, Packer, ReaderKey};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use ed25519_dalek::{Signature, VerifyingKey};
use hkdf::Hkdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey as EcdhPublicKey, SecretKey as EcdhSecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use upspin_path::Path;
use upspin_types::{DirEntry, Error, Packing};

const FILE_KEY_LEN: usize = 32;
const WRAP_ENTRY_LEN: usize = 32 + 33 + (FILE_KEY_LEN + 16); // key_hash + ephemeral pub + wrapped(tag incl.)
const SIGNATURE_LEN: usize = 64;
const HKDF_INFO: &[u8] = b"upspin-ee-key-wrap-v1";

pub struct EePacker;

fn block_nonce(name: &Path, index: usize) -> [u8; 12] {
    let mut hasher = Sha256::new();
    hasher.update(name.to_string().as_bytes());
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&digest[..12]);
    nonce
}

fn derive_kek(shared_secret: &[u8; 32]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut kek = [0u8; 32];
    hk.expand(HKDF_INFO, &mut kek)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    kek
}

fn wrap_key(file_key: &[u8; FILE_KEY_LEN], reader: &ReaderKey) -> Vec<u8> {
    let ephemeral = EcdhSecretKey::random(&mut OsRng);
    let ephemeral_pub = ephemeral.public_key();
    let shared = p256::ecdh::diffie_hellman(
        ephemeral.to_nonzero_scalar(),
        reader.ecdh.as_affine(),
    );
    let mut shared_bytes = [0u8; 32];
    shared_bytes.copy_from_slice(shared.raw_secret_bytes().as_slice());
    let kek = derive_kek(&shared_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&kek));
    let wrapped = cipher
        .encrypt(Nonce::from_slice(&[0u8; 12]), file_key.as_slice())
        .expect("AES-256-GCM encryption of a 32-byte key cannot fail");

    let mut entry = Vec::with_capacity(WRAP_ENTRY_LEN);
    entry.extend_from_slice(&ecdh_key_hash(&reader.ecdh));
    entry.extend_from_slice(ephemeral_pub.to_encoded_point(true).as_bytes());
    entry.extend_from_slice(&wrapped);
    entry
}

fn unwrap_key(entry_bytes: &[u8], factotum: &dyn Factotum) -> Result<[u8; FILE_KEY_LEN], Error> {
    let my_hash = ecdh_key_hash(&factotum.public_keys().ecdh);

    for chunk in entry_bytes.chunks(WRAP_ENTRY_LEN) {
        if chunk.len() != WRAP_ENTRY_LEN {
            break;
        }
        let key_hash = &chunk[0..32];
        if key_hash != my_hash {
            continue;
        }
        let ephemeral_pub_bytes = &chunk[32..65];
        let wrapped = &chunk[65..WRAP_ENTRY_LEN];

        let ephemeral_pub = EcdhPublicKey::from_sec1_bytes(ephemeral_pub_bytes)
            .map_err(|_| Error::cannot_decrypt("malformed ephemeral public key in packdata"))?;
        let shared = factotum.ecdh_shared_secret(&ephemeral_pub);
        let kek = derive_kek(&shared);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&kek));
        let file_key = cipher
            .decrypt(Nonce::from_slice(&[0u8; 12]), wrapped)
            .map_err(|_| Error::cannot_decrypt("failed to unwrap per-file key"))?;
        return file_key
            .try_into()
            .map_err(|_| Error::cannot_decrypt("unwrapped key has the wrong length"));
    }

    Err(Error::cannot_decrypt(
        "no wrapped key in packdata for this reader",
    ))
}

fn signing_message(signed_name: &Path, time: u64, block_refs: &[String]) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.extend_from_slice(signed_name.to_string().as_bytes());
    msg.extend_from_slice(&time.to_le_bytes());
    for r in block_refs {
        msg.extend_from_slice(r.as_bytes());
    }
    msg
}

fn split_packdata(packdata: &[u8]) -> Result<(&[u8], &[u8]), Error> {
    if packdata.len() < 4 {
        return Err(Error::cannot_decrypt("truncated packdata"));
    }
    let num_readers = u32::from_le_bytes(packdata[0..4].try_into().unwrap()) as usize;
    let wraps_len = num_readers
        .checked_mul(WRAP_ENTRY_LEN)
        .ok_or_else(|| Error::cannot_decrypt("reader count overflow"))?;
    let wraps_end = 4 + wraps_len;
    let sig_end = wraps_end + SIGNATURE_LEN;
    if packdata.len() != sig_end {
        return Err(Error::cannot_decrypt("packdata length mismatch"));
    }
    Ok((&packdata[4..wraps_end], &packdata[wraps_end..sig_end]))
}

#[async_trait]
impl Packer for EePacker {
    fn packing(&self) -> Packing {
        Packing::Ee
    }

    #[tracing::instrument(skip_all, err, fields(name = %name, readers = readers.len()))]
    async fn pack(
        &self,
        factotum: &dyn Factotum,
        name: &Path,
        time: u64,
        data: &[u8],
        readers: &[ReaderKey],
    ) -> Result<PackedFile, Error> {
        let mut file_key = [0u8; FILE_KEY_LEN];
        OsRng.fill_bytes(&mut file_key);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&file_key));

        let mut blocks = Vec::new();
        for (i, plaintext) in chunk(data, DEFAULT_BLOCK_SIZE).into_iter().enumerate() {
            let nonce = block_nonce(name, i);
            let ciphertext = cipher
                .encrypt(Nonce::from_slice(&nonce), plaintext)
                .map_err(|_| Error::internal("block encryption failed"))?;
            blocks.push(PackedBlock {
                reference: sha256_hex(&ciphertext),
                bytes: ciphertext,
            });
        }

        let mut packdata = Vec::new();
        packdata.extend_from_slice(&(readers.len() as u32).to_le_bytes());
        for reader in readers {
            packdata.extend_from_slice(&wrap_key(&file_key, reader));
        }

        let refs: Vec<String> = blocks.iter().map(|b| b.reference.to_string()).collect();
        let signature = factotum.sign(&signing_message(name, time, &refs));
        packdata.extend_from_slice(&signature.to_bytes());

        Ok(PackedFile { blocks, packdata })
    }

    #[tracing::instrument(skip_all, err, fields(name = %entry.name))]
    async fn unpack(
        &self,
        entry: &DirEntry,
        factotum: &dyn Factotum,
        writer_key: &VerifyingKey,
        block_bytes: &[Vec<u8>],
    ) -> Result<Vec<u8>, Error> {
        let (wraps, sig_bytes) = split_packdata(&entry.packdata)?;
        let file_key = unwrap_key(wraps, factotum)?;

        let refs: Vec<String> = entry
            .blocks
            .iter()
            .map(|b| b.location.reference.to_string())
            .collect();
        let sig_array: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| Error::cannot_decrypt("malformed signature"))?;
        let signature = Signature::from_bytes(&sig_array);
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

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&file_key));
        let mut plaintext = Vec::new();
        for (i, ciphertext) in block_bytes.iter().enumerate() {
            let nonce = block_nonce(&entry.name, i);
            let block = cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                .map_err(|_| Error::cannot_decrypt("block decryption failed"))?;
            plaintext.extend_from_slice(&block);
        }
        Ok(plaintext)
    }

    async fn share(
        &self,
        entry: &DirEntry,
        factotum: &dyn Factotum,
        readers: &[ReaderKey],
    ) -> Result<DirEntry, Error> {
        let (wraps, sig_bytes) = split_packdata(&entry.packdata)?;
        let file_key = unwrap_key(wraps, factotum)?;

        let mut packdata = Vec::new();
        packdata.extend_from_slice(&(readers.len() as u32).to_le_bytes());
        for reader in readers {
            packdata.extend_from_slice(&wrap_key(&file_key, reader));
        }
        packdata.extend_from_slice(sig_bytes);

        let mut new_entry = entry.clone();
        new_entry.packdata = packdata;
        Ok(new_entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factotum::InMemoryFactotum;
    use upspin_types::{sequence, Attr, BlockDescriptor, Endpoint, Location};

    fn reader_key(f: &InMemoryFactotum, user: &str) -> ReaderKey {
        ReaderKey {
            user: upspin_path::UserName::parse(user).unwrap(),
            ecdh: f.public_keys().ecdh,
        }
    }

    fn entry_from_packed(name: &Path, writer: &upspin_path::UserName, time: u64, packed: &PackedFile) -> DirEntry {
        DirEntry {
            name: name.clone(),
            signed_name: name.clone(),
            attr: Attr::NONE,
            packing: Packing::Ee,
            writer: writer.clone(),
            sequence: sequence::BASE,
            time,
            blocks: packed
                .blocks
                .iter()
                .map(|b| BlockDescriptor {
                    location: Location {
                        endpoint: Endpoint::in_process(),
                        reference: b.reference.clone(),
                    },
                    offset: 0,
                    size: b.bytes.len() as u64,
                    packdata: vec![],
                })
                .collect(),
            packdata: packed.packdata.clone(),
            link: None,
        }
    }

    #[tokio::test]
    async fn round_trips_for_intended_reader() {
        let packer = EePacker;
        let writer = InMemoryFactotum::generate();
        let bob = InMemoryFactotum::generate();
        let name = Path::parse("ann@example.com/hello").unwrap();

        let readers = vec![reader_key(&bob, "bob@foo.com")];
        let packed = packer
            .pack(&writer, &name, 100, b"hi there", &readers)
            .await
            .unwrap();

        let entry = entry_from_packed(&name, &name.user().clone(), 100, &packed);
        let block_bytes: Vec<Vec<u8>> = packed.blocks.iter().map(|b| b.bytes.clone()).collect();

        let out = packer
            .unpack(&entry, &bob, &writer.public_keys().signing, &block_bytes)
            .await
            .unwrap();
        assert_eq!(out, b"hi there");
    }

    #[tokio::test]
    async fn unintended_reader_cannot_unwrap() {
        let packer = EePacker;
        let writer = InMemoryFactotum::generate();
        let bob = InMemoryFactotum::generate();
        let eve = InMemoryFactotum::generate();
        let name = Path::parse("ann@example.com/hello").unwrap();

        let readers = vec![reader_key(&bob, "bob@foo.com")];
        let packed = packer
            .pack(&writer, &name, 100, b"secret", &readers)
            .await
            .unwrap();
        let entry = entry_from_packed(&name, &name.user().clone(), 100, &packed);
        let block_bytes: Vec<Vec<u8>> = packed.blocks.iter().map(|b| b.bytes.clone()).collect();

        let err = packer
            .unpack(&entry, &eve, &writer.public_keys().signing, &block_bytes)
            .await
            .unwrap_err();
        assert_eq!(err.kind, upspin_types::Kind::CannotDecrypt);
    }

    #[tokio::test]
    async fn share_rewraps_for_new_reader_without_changing_ciphertext() {
        let packer = EePacker;
        let writer = InMemoryFactotum::generate();
        let carl = InMemoryFactotum::generate();
        let name = Path::parse("ann@example.com/hello").unwrap();

        // writer must include itself as a reader to be able to `share` later.
        let self_reader = ReaderKey {
            user: name.user().clone(),
            ecdh: writer.public_keys().ecdh,
        };
        let packed = packer
            .pack(&writer, &name, 1, b"payload", std::slice::from_ref(&self_reader))
            .await
            .unwrap();
        let entry = entry_from_packed(&name, &name.user().clone(), 1, &packed);

        let carl_reader = reader_key(&carl, "carl@foo.com");
        let shared_entry = packer
            .share(&entry, &writer, &[self_reader, carl_reader])
            .await
            .unwrap();

        assert_eq!(shared_entry.blocks, entry.blocks); // ciphertext untouched

        let block_bytes: Vec<Vec<u8>> = packed.blocks.iter().map(|b| b.bytes.clone()).collect();
        let out = packer
            .unpack(&shared_entry, &carl, &writer.public_keys().signing, &block_bytes)
            .await
            .unwrap();
        assert_eq!(out, b"payload");
    }
}
