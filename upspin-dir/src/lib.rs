//! The directory server: the public face of the tree engine (spec's
//! "directory server"). Per-request access checks, link resolution,
//! globbing, and watch streams sit in front of `upspin-tree`'s mutable
//! per-owner trees.

mod access;
mod flush;
mod glob;
mod locks;
mod server;
mod watch;

pub use access::{is_group_path, ACCESS_FILE_NAME};
pub use server::{DirServer, Outcome};
pub use watch::WatchEvent;
