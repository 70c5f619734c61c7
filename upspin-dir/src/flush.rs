//! The directory server's [`FlushSink`]: stores a dirty directory's
//! serialized children content-addressed in the store, then signs the
//! directory entry the way `upspin_pack`'s `eeintegrity` packer signs a
//! file entry — over the signed name, time, and block references.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use upspin_pack::Factotum;
use upspin_store::StoreServer;
use upspin_tree::FlushSink;
use upspin_types::{DirEntry, Endpoint, Error, Location, Reference};

fn sha256_hex(data: &[u8]) -> Reference {
    Reference::from(data_encoding::HEXLOWER.encode(&Sha256::digest(data)))
}

/// Mirrors `upspin_pack::eeintegrity`'s signing message: the directory
/// entry's signature covers its signed name, time, and ordered block
/// references, never the content itself (the content is the block, already
/// addressed by those references).
fn signing_message(entry: &DirEntry) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.extend_from_slice(entry.signed_name.to_string().as_bytes());
    msg.extend_from_slice(&entry.time.to_le_bytes());
    for b in &entry.blocks {
        msg.extend_from_slice(b.location.reference.as_str().as_bytes());
    }
    msg
}

/// One [`TreeFlushSink`] per owner user, holding that user's factotum so
/// flush can re-sign the directory entries it rewrites.
pub struct TreeFlushSink {
    store: Arc<StoreServer>,
    factotum: Arc<dyn Factotum>,
}

impl TreeFlushSink {
    pub fn new(store: Arc<StoreServer>, factotum: Arc<dyn Factotum>) -> Self {
        TreeFlushSink { store, factotum }
    }
}

#[async_trait]
impl FlushSink for TreeFlushSink {
    async fn put_block(&self, data: Vec<u8>) -> Result<Location, Error> {
        let reference = sha256_hex(&data);
        self.store.put(&reference, &data).await?;
        Ok(Location {
            endpoint: Endpoint::in_process(),
            reference,
        })
    }

    async fn sign(&self, entry: &mut DirEntry) -> Result<(), Error> {
        let signature = self.factotum.sign(&signing_message(entry));
        entry.packdata = signature.to_bytes().to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upspin_pack::{verify, InMemoryFactotum};
    use upspin_store::MemoryStoreDriver;
    use upspin_types::{sequence, Attr, Packing};

    #[tokio::test]
    async fn put_block_stores_content_addressed() {
        let store = Arc::new(StoreServer::new(Arc::new(MemoryStoreDriver::new())));
        let factotum = Arc::new(InMemoryFactotum::generate());
        let sink = TreeFlushSink::new(store.clone(), factotum);

        let location = sink.put_block(b"hello world".to_vec()).await.unwrap();
        match store.get(&location.reference).await.unwrap() {
            upspin_store::GetResult::Bytes(b) => assert_eq!(b, b"hello world"),
            upspin_store::GetResult::AlternateLocations(_) => panic!("expected bytes"),
        }
    }

    #[tokio::test]
    async fn sign_produces_a_verifiable_signature() {
        let store = Arc::new(StoreServer::new(Arc::new(MemoryStoreDriver::new())));
        let factotum = Arc::new(InMemoryFactotum::generate());
        let sink = TreeFlushSink::new(store, factotum.clone());

        let name = upspin_path::Path::parse("ann@example.com/").unwrap();
        let mut entry = DirEntry {
            name: name.clone(),
            signed_name: name,
            attr: Attr::DIRECTORY,
            packing: Packing::EeIntegrity,
            writer: upspin_path::UserName::parse("ann@example.com").unwrap(),
            sequence: sequence::BASE,
            time: 42,
            blocks: vec![],
            packdata: vec![],
            link: None,
        };

        sink.sign(&mut entry).await.unwrap();
        let sig_bytes: [u8; 64] = entry.packdata.as_slice().try_into().unwrap();
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        assert!(verify(
            &factotum.public_keys().signing,
            &signing_message(&entry),
            &signature
        ));
    }
}
