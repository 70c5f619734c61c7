//! The in-process holder of a user's private key material. A [`Factotum`]
//! signs and unwraps but never exposes the raw key — packers only ever see
//! signatures and unwrapped symmetric keys, never the private scalars.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey as EcdhPublicKey, SecretKey as EcdhSecretKey};
use rand::rngs::OsRng;

/// A reader or writer's public key material, as published by the key
/// server: an Ed25519 verifying key (signatures) and a P-256 public point
/// (ECDH key-wrap).
#[derive(Debug, Clone)]
pub struct PublicKeys {
    pub signing: VerifyingKey,
    pub ecdh: EcdhPublicKey,
}

/// Holds a user's private key material and performs the two operations the
/// packing pipeline needs: signing, and unwrapping a symmetric key that was
/// ECDH-wrapped for this user. The private scalars never leave this type.
pub trait Factotum: Send + Sync {
    fn public_keys(&self) -> PublicKeys;

    fn sign(&self, message: &[u8]) -> Signature;

    /// Performs ECDH between this user's private key and `ephemeral_pub`,
    /// returning the raw shared secret. Used to derive a key-wrap KEK; the
    /// caller (the `ee` packer) is responsible for the KDF.
    fn ecdh_shared_secret(&self, ephemeral_pub: &EcdhPublicKey) -> [u8; 32];
}

/// A software [`Factotum`] holding keys directly in process memory.
pub struct InMemoryFactotum {
    signing: SigningKey,
    ecdh: EcdhSecretKey,
}

impl InMemoryFactotum {
    pub fn generate() -> Self {
        InMemoryFactotum {
            signing: SigningKey::generate(&mut OsRng),
            ecdh: EcdhSecretKey::random(&mut OsRng),
        }
    }

    pub fn from_keys(signing: SigningKey, ecdh: EcdhSecretKey) -> Self {
        InMemoryFactotum { signing, ecdh }
    }
}

impl Factotum for InMemoryFactotum {
    fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            signing: self.signing.verifying_key(),
            ecdh: self.ecdh.public_key(),
        }
    }

    fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    fn ecdh_shared_secret(&self, ephemeral_pub: &EcdhPublicKey) -> [u8; 32] {
        let shared = diffie_hellman(self.ecdh.to_nonzero_scalar(), ephemeral_pub.as_affine());
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        out
    }
}

/// Verifies `signature` over `message` under `key`.
pub fn verify(key: &VerifyingKey, message: &[u8], signature: &Signature) -> bool {
    key.verify(message, signature).is_ok()
}

/// A stable, short identifier for a public ECDH key, used to tag which
/// reader a wrapped key in `Packdata` belongs to.
pub fn ecdh_key_hash(key: &EcdhPublicKey) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.to_encoded_point(true).as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdh_round_trip_between_two_factotums() {
        let writer = InMemoryFactotum::generate();
        let reader = InMemoryFactotum::generate();

        let eph = EcdhSecretKey::random(&mut OsRng);
        let eph_pub = eph.public_key();

        let writer_shared = {
            let shared = diffie_hellman(
                eph.to_nonzero_scalar(),
                reader.public_keys().ecdh.as_affine(),
            );
            let mut out = [0u8; 32];
            out.copy_from_slice(shared.raw_secret_bytes().as_slice());
            out
        };
        let reader_shared = reader.ecdh_shared_secret(&eph_pub);

        assert_eq!(writer_shared, reader_shared);
        let _ = writer.public_keys();
    }

    #[test]
    fn signature_round_trips() {
        let f = InMemoryFactotum::generate();
        let sig = f.sign(b"hello");
        assert!(verify(&f.public_keys().signing, b"hello", &sig));
        assert!(!verify(&f.public_keys().signing, b"tampered", &sig));
    }
}
