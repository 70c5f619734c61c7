//! Core data model shared by every Upspin crate: directory entries,
//! locations, the error taxonomy, and their canonical binary encoding.
//! Kept separate from `upspin-tree`/`upspin-pack` so those two can each
//! depend on these types without depending on one another.

pub mod codec;
mod entry;
mod error;
mod location;

pub use entry::{sequence, Attr, BlockDescriptor, DirEntry, Packing};
pub use error::{Error, Kind};
pub use location::{Endpoint, Location, Reference, Transport};
