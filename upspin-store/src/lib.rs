//! The content-addressed blob store: a pluggable [`StoreDriver`] plus the
//! [`StoreServer`] that layers hash verification and idempotent-delete
//! semantics on top of it.

mod disk;
mod driver;
mod from_addr;
mod memory;
mod store;

pub use disk::DiskStoreDriver;
pub use driver::StoreDriver;
pub use from_addr::from_addr;
pub use memory::MemoryStoreDriver;
pub use store::{GetResult, StoreServer};
