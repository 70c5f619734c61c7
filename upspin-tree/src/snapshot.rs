//! Snapshot users (`local+snapshot@domain`) and the periodic/on-demand
//! policy that mounts a dated copy of the base user's tree into one.

use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use upspin_path::Path;
use upspin_types::{Attr, DirEntry, Error, Kind, Packing};

use crate::tree::Tree;

/// Default period between automatic snapshots of a user's tree.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Upper bound on `nextDirectoryVersion` probing, so a pathological run of
/// same-day snapshot collisions cannot loop forever.
const MAX_VERSION_TRIES: u32 = 10_000;

/// True if `path` is the well-known control path
/// `…+snapshot@domain/TakeSnapshot` that requests an immediate snapshot.
pub fn is_take_snapshot_control_path(path: &Path) -> bool {
    path.user().is_snapshot() && path.elements() == ["TakeSnapshot"]
}

/// Validates the criteria a `TakeSnapshot` control entry must meet: empty,
/// plain-packed, not a directory, not a link. Rejecting a malformed
/// control entry with a precise error (rather than silently ignoring it)
/// is a deliberate choice — see `DESIGN.md`.
pub fn validate_control_entry(entry: &DirEntry) -> Result<(), Error> {
    if entry.attr.is_dir() {
        return Err(Error::invalid("TakeSnapshot control entry must not be a directory"));
    }
    if entry.attr.is_link() {
        return Err(Error::invalid("TakeSnapshot control entry must not be a link"));
    }
    if entry.attr != Attr::NONE {
        return Err(Error::invalid("TakeSnapshot control entry must carry no attributes"));
    }
    if entry.packing != Packing::Plain {
        return Err(Error::invalid("TakeSnapshot control entry must be plain-packed"));
    }
    if !entry.blocks.is_empty() {
        return Err(Error::invalid("TakeSnapshot control entry must be empty"));
    }
    Ok(())
}

/// Finds the first unused directory name under `parent` in `tree`, trying
/// `base_name`, then `base_name.1`, `base_name.2`, … . Used to mount same-day
/// repeated snapshots without colliding.
pub async fn next_directory_version(
    tree: &Tree,
    parent: &Path,
    base_name: &str,
) -> Result<Path, Error> {
    for n in 0..MAX_VERSION_TRIES {
        let candidate_name = if n == 0 {
            base_name.to_string()
        } else {
            format!("{base_name}.{n}")
        };
        let candidate_path = parent
            .join(&candidate_name)
            .map_err(|e| Error::invalid(e.to_string()))?;
        match tree.lookup(&candidate_path).await {
            Err(e) if e.kind == Kind::NotExist => return Ok(candidate_path),
            Err(e) => return Err(e),
            Ok(_) => continue,
        }
    }
    Err(Error::internal(format!(
        "exhausted {MAX_VERSION_TRIES} nextDirectoryVersion attempts under {parent}"
    )))
}

/// Runs `take_snapshot` every `interval_period`, until `cancel` fires.
/// Grounded on the teacher's `tokio::spawn`-a-background-task pattern
/// (e.g. `tvix_castore::fs`'s inode eviction task), generalized to a
/// periodic tick since nothing in the teacher's corpus runs on a
/// wall-clock schedule.
pub async fn run_periodic_snapshots<F, Fut>(
    interval_period: Duration,
    cancel: CancellationToken,
    mut take_snapshot: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), Error>>,
{
    let mut ticker = interval(interval_period);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = take_snapshot().await {
                    tracing::warn!(error = %e, "periodic snapshot failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upspin_path::UserName;
    use upspin_types::sequence;

    #[test]
    fn recognizes_control_path() {
        let path = Path::parse("ann+snapshot@example.com/TakeSnapshot").unwrap();
        assert!(is_take_snapshot_control_path(&path));
        let other = Path::parse("ann+snapshot@example.com/TakeSnapshot/extra").unwrap();
        assert!(!is_take_snapshot_control_path(&other));
        let not_snapshot_user = Path::parse("ann@example.com/TakeSnapshot").unwrap();
        assert!(!is_take_snapshot_control_path(&not_snapshot_user));
    }

    fn base_entry(attr: Attr, packing: Packing, blocks_len: usize) -> DirEntry {
        let name = Path::parse("ann+snapshot@example.com/TakeSnapshot").unwrap();
        DirEntry {
            name: name.clone(),
            signed_name: name,
            attr,
            packing,
            writer: UserName::parse("ann+snapshot@example.com").unwrap(),
            sequence: sequence::BASE,
            time: 0,
            blocks: (0..blocks_len)
                .map(|_| upspin_types::BlockDescriptor {
                    location: upspin_types::Location {
                        endpoint: upspin_types::Endpoint::in_process(),
                        reference: upspin_types::Reference::from("x"),
                    },
                    offset: 0,
                    size: 0,
                    packdata: vec![],
                })
                .collect(),
            packdata: vec![],
            link: None,
        }
    }

    #[test]
    fn validates_control_entry_criteria() {
        assert!(validate_control_entry(&base_entry(Attr::NONE, Packing::Plain, 0)).is_ok());
        assert!(validate_control_entry(&base_entry(Attr::DIRECTORY, Packing::Plain, 0)).is_err());
        assert!(validate_control_entry(&base_entry(Attr::NONE, Packing::Ee, 0)).is_err());
        assert!(validate_control_entry(&base_entry(Attr::NONE, Packing::Plain, 1)).is_err());
    }

    #[tokio::test]
    async fn next_directory_version_skips_existing_names() {
        let dir = tempfile::tempdir().unwrap();
        let owner = UserName::parse("ann+snapshot@example.com").unwrap();
        let tree = Tree::open(owner.clone(), dir.path()).await.unwrap();

        let root = DirEntry {
            name: Path::parse("ann+snapshot@example.com/").unwrap(),
            signed_name: Path::parse("ann+snapshot@example.com/").unwrap(),
            attr: Attr::DIRECTORY,
            packing: Packing::Plain,
            writer: owner.clone(),
            sequence: sequence::IGNORE,
            time: 0,
            blocks: vec![],
            packdata: vec![],
            link: None,
        };
        tree.put(&Path::parse("ann+snapshot@example.com/").unwrap(), root)
            .await
            .unwrap();

        let dated = DirEntry {
            name: Path::parse("ann+snapshot@example.com/2026-07-28").unwrap(),
            signed_name: Path::parse("ann+snapshot@example.com/2026-07-28").unwrap(),
            attr: Attr::DIRECTORY,
            packing: Packing::Plain,
            writer: owner.clone(),
            sequence: sequence::IGNORE,
            time: 0,
            blocks: vec![],
            packdata: vec![],
            link: None,
        };
        tree.put(&dated.name.clone(), dated).await.unwrap();

        let parent = Path::parse("ann+snapshot@example.com/").unwrap();
        let next = next_directory_version(&tree, &parent, "2026-07-28")
            .await
            .unwrap();
        assert_eq!(next.to_string(), "ann+snapshot@example.com/2026-07-28.1");
    }
}
