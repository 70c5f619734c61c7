//! The packing pipeline: per-packing encryption/signing of file contents
//! on write, verification/decryption on read, and key rewrap on an access
//! change without a full re-read.

mod block;
mod debug;
mod ee;
mod eeintegrity;
mod factotum;
mod packer;
mod plain;

pub use factotum::{ecdh_key_hash, verify, Factotum, InMemoryFactotum, PublicKeys};
pub use packer::{PackedBlock, PackedFile, Packer, ReaderKey};
pub use upspin_types::Packing;

use std::sync::Arc;

/// Returns the [`Packer`] implementation for `packing`, the same
/// scheme-to-backend dispatch shape as the teacher's `from_addr`
/// constructors.
pub fn packer_for(packing: Packing) -> Arc<dyn Packer> {
    match packing {
        Packing::Plain => Arc::new(plain::PlainPacker),
        Packing::EeIntegrity => Arc::new(eeintegrity::EeIntegrityPacker),
        Packing::Ee => Arc::new(ee::EePacker),
        Packing::Debug => Arc::new(debug::DebugPacker),
    }
}
