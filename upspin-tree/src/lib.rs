//! The tree engine: a per-owner-user in-memory directory tree backed by
//! a durable append-only log, with crash recovery, sequencing, and
//! `+snapshot` user versioning.

mod log;
mod node;
mod snapshot;
mod tree;

pub use log::{Log, LogEntry, Op};
pub use node::Node;
pub use snapshot::{
    is_take_snapshot_control_path, next_directory_version, run_periodic_snapshots,
    validate_control_entry, DEFAULT_SNAPSHOT_INTERVAL,
};
pub use tree::{FlushSink, ListOutcome, LookupOutcome, Tree};
