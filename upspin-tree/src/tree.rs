//! The in-memory directory tree: a single owner user's namespace, backed
//! by the append-only [`Log`] for durability and replayed from it on
//! startup.

use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;

use upspin_path::{Path, UserName};
use upspin_types::{codec, sequence, Attr, BlockDescriptor, DirEntry, Error, Location};

use crate::log::{Log, LogEntry, Op};
use crate::node::Node;

/// Outcome of a path lookup that can stop mid-traversal at a symbolic
/// link, as a distinct success variant rather than an error — matching
/// the design note that `ErrFollowLink` is control flow, not failure.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    Entry { entry: DirEntry, is_dirty: bool },
    FollowLink(DirEntry),
}

#[derive(Debug, Clone)]
pub enum ListOutcome {
    Entries(Vec<DirEntry>),
    FollowLink(DirEntry),
}

/// Injected by the directory server: serializes a dirty directory's
/// children into a block, stores it, and re-signs the directory entry.
/// Kept as a capability trait (rather than a hard dependency on
/// `upspin-pack`/`upspin-store`) so the tree engine stays decoupled from
/// the packing and storage backends, the same duck-typed-collaborator
/// shape `castore` injects a `BlobService` into a `DirectoryService` with.
#[async_trait]
pub trait FlushSink: Send + Sync {
    async fn put_block(&self, data: Vec<u8>) -> Result<Location, Error>;

    /// Re-signs `entry` in place after its blocks have changed.
    async fn sign(&self, entry: &mut DirEntry) -> Result<(), Error>;
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs()
}

/// Per-owner-user mutable directory tree, durable append-only log, and
/// sequencing. One `Tree` instance exists per owner user held open by the
/// directory server.
pub struct Tree {
    owner: UserName,
    log: Arc<Log>,
    root: Mutex<Option<Node>>,
}

impl Tree {
    /// Opens the tree rooted at `log_dir`, replaying the log to rebuild
    /// in-memory state. If the log is empty, the tree starts with no root
    /// (the caller must `Put` the root directory entry first).
    ///
    /// If a checkpoint (`tree.index.<user>`/`tree.root.<user>`, written by
    /// [`Tree::flush`]) is present, its offset must not be past the log's
    /// current end: a checkpoint pointing past the end means the log was
    /// truncated or replaced out from under a prior flush, which is
    /// surfaced as an error rather than silently replayed over.
    pub async fn open(owner: UserName, log_dir: impl AsRef<FsPath>) -> Result<Self, Error> {
        let log = Arc::new(Log::open(log_dir).await?);

        if let Some((checkpoint_offset, _)) = log.read_checkpoint(&owner).await? {
            let last = log.last_offset().await;
            if checkpoint_offset > last {
                return Err(Error::io(format!(
                    "{owner}: checkpoint offset {checkpoint_offset} is past the log's end {last}"
                )));
            }
        }

        let records = log.replay().await?;
        let mut root: Option<Node> = None;
        for record in records {
            apply_replayed(&mut root, record)?;
        }

        Ok(Tree {
            owner,
            log,
            root: Mutex::new(root),
        })
    }

    pub fn owner(&self) -> &UserName {
        &self.owner
    }

    /// Inserts or overwrites `entry` at `path`. Enforces the sequence
    /// policy (`Ignore` skips the check, `NotExist` requires absence, any
    /// other value must match the current entry's sequence) and stamps a
    /// fresh time and sequence on success. A non-root `Put` also bumps its
    /// parent directory's own `Sequence`, logged as a second `Put` record
    /// under the parent's own name so replay reconstructs exact sequence
    /// values without needing to re-derive them.
    #[tracing::instrument(skip_all, err, fields(path = %path))]
    pub async fn put(&self, path: &Path, mut entry: DirEntry) -> Result<DirEntry, Error> {
        if path.user() != &self.owner {
            return Err(Error::invalid("path does not belong to this tree's owner"));
        }
        let time = now_secs();
        let mut root = self.root.lock().await;

        let (stored, parent_update) = if path.is_root() {
            let existing = root.as_ref().map(|n| &n.entry);
            check_sequence(existing, entry.sequence)?;
            entry.sequence = existing.map_or(sequence::BASE, |e| e.sequence + 1);
            entry.time = time;
            let new_node = Node {
                entry: entry.clone(),
                dirty: true,
                children: entry
                    .attr
                    .is_dir()
                    .then(|| root.take().and_then(|n| n.children).unwrap_or_default()),
            };
            *root = Some(new_node);
            (entry, None)
        } else {
            let root_node = root
                .as_mut()
                .ok_or_else(|| Error::not_exist("tree has no root yet"))?;
            let (stored, parent_entry) = put_recursive(root_node, path.elements(), entry, time)?;
            (stored, Some(parent_entry))
        };

        if let Some(parent_entry) = parent_update {
            self.log
                .append(&LogEntry {
                    op: Op::Put,
                    entry: parent_entry,
                })
                .await?;
        }

        self.log
            .append(&LogEntry {
                op: Op::Put,
                entry: stored.clone(),
            })
            .await?;
        Ok(stored)
    }

    /// Returns the entry at `path`, or the link entry and
    /// [`LookupOutcome::FollowLink`] if a link is encountered before the
    /// traversal reaches `path`.
    #[tracing::instrument(skip_all, err, fields(path = %path))]
    pub async fn lookup(&self, path: &Path) -> Result<LookupOutcome, Error> {
        let root = self.root.lock().await;
        let root_node = root
            .as_ref()
            .ok_or_else(|| Error::not_exist(format!("{path} does not exist")))?;

        if path.is_root() {
            return Ok(LookupOutcome::Entry {
                entry: root_node.entry.clone(),
                is_dirty: root_node.dirty,
            });
        }

        match find(root_node, path.elements()) {
            Ok(node) => Ok(LookupOutcome::Entry {
                entry: node.entry.clone(),
                is_dirty: node.dirty,
            }),
            Err(FindError::FollowLink(entry)) => Ok(LookupOutcome::FollowLink(entry)),
            Err(FindError::Core(e)) => Err(e),
        }
    }

    /// Removes the entry at `path`. A directory must be empty, unless the
    /// path is the root and every subtree has already been removed.
    #[tracing::instrument(skip_all, err, fields(path = %path))]
    pub async fn delete(&self, path: &Path) -> Result<DirEntry, Error> {
        let mut root = self.root.lock().await;

        let removed = if path.is_root() {
            let node = root
                .as_ref()
                .ok_or_else(|| Error::not_exist(format!("{path} does not exist")))?;
            if node.children.as_ref().is_some_and(|c| !c.is_empty()) {
                return Err(Error::not_empty("root directory is not empty"));
            }
            root.take()
                .ok_or_else(|| Error::not_exist(format!("{path} does not exist")))?
                .entry
        } else {
            let root_node = root
                .as_mut()
                .ok_or_else(|| Error::not_exist("tree has no root yet"))?;
            delete_recursive(root_node, path.elements())?
        };

        self.log
            .append(&LogEntry {
                op: Op::Delete,
                entry: removed.clone(),
            })
            .await?;
        Ok(removed)
    }

    /// Lists the direct children of the directory at `path`.
    #[tracing::instrument(skip_all, err, fields(path = %path))]
    pub async fn list(&self, path: &Path) -> Result<ListOutcome, Error> {
        let root = self.root.lock().await;
        let root_node = root
            .as_ref()
            .ok_or_else(|| Error::not_exist(format!("{path} does not exist")))?;

        let node = if path.is_root() {
            Ok(root_node)
        } else {
            find(root_node, path.elements())
        };

        match node {
            Ok(node) => {
                let children = node
                    .children
                    .as_ref()
                    .ok_or_else(|| Error::not_dir(format!("{path} is not a directory")))?;
                let mut entries: Vec<DirEntry> =
                    children.values().map(|n| n.entry.clone()).collect();
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(ListOutcome::Entries(entries))
            }
            Err(FindError::FollowLink(entry)) => Ok(ListOutcome::FollowLink(entry)),
            Err(FindError::Core(e)) => Err(e),
        }
    }

    /// Mounts `subtree` (typically a deep clone of another tree's live
    /// root, taken for a snapshot) at `dst`, under the same sequencing and
    /// logging path as `put`.
    #[tracing::instrument(skip_all, err, fields(dst = %dst))]
    pub async fn put_dir(&self, dst: &Path, subtree: Node) -> Result<DirEntry, Error> {
        if dst.user() != &self.owner {
            return Err(Error::invalid("destination does not belong to this tree's owner"));
        }
        let time = now_secs();
        let mut root = self.root.lock().await;

        let stored = if dst.is_root() {
            let mut node = subtree;
            node.entry.sequence = root.as_ref().map_or(sequence::BASE, |n| n.entry.sequence + 1);
            node.entry.time = time;
            node.dirty = true;
            let entry = node.entry.clone();
            *root = Some(node);
            entry
        } else {
            let root_node = root
                .as_mut()
                .ok_or_else(|| Error::not_exist("tree has no root yet"))?;
            put_dir_recursive(root_node, dst.elements(), subtree, time)?
        };

        self.log
            .append(&LogEntry {
                op: Op::Put,
                entry: stored.clone(),
            })
            .await?;
        Ok(stored)
    }

    /// Serializes every dirty directory into a block via `sink`, from the
    /// leaves up, then checkpoints the flushed root and the log offset it
    /// corresponds to into the log's `tree.index.<user>`/`tree.root.<user>`
    /// side files, so the next `open` can detect a log truncated out from
    /// under this checkpoint.
    #[tracing::instrument(skip_all, err)]
    pub async fn flush(&self, sink: &dyn FlushSink) -> Result<(), Error> {
        let mut root = self.root.lock().await;
        if let Some(node) = root.as_mut() {
            flush_recursive(node, sink).await?;
            let offset = self.log.last_offset().await;
            self.log.write_checkpoint(&self.owner, offset, &node.entry).await?;
        }
        Ok(())
    }

    /// Flushes, then releases the log's file handles by dropping this
    /// tree. There is no separate handle to close: `Log` has no buffered
    /// writer state beyond the currently open file, which closes when
    /// this `Tree` (and its `Arc<Log>`) is dropped.
    pub async fn close(self, sink: &dyn FlushSink) -> Result<(), Error> {
        self.flush(sink).await
    }

    pub async fn last_log_offset(&self) -> u64 {
        self.log.last_offset().await
    }

    /// `ReadAt` on this tree's log, for `Watch` streams. See [`Log::read_at`].
    pub async fn read_log_at(&self, offset: u64) -> Result<Option<(LogEntry, u64)>, Error> {
        self.log.read_at(offset).await
    }
}

fn check_sequence(existing: Option<&DirEntry>, requested: i64) -> Result<(), Error> {
    match requested {
        sequence::IGNORE => Ok(()),
        sequence::NOT_EXIST => {
            if existing.is_some() {
                Err(Error::exist("entry already exists"))
            } else {
                Ok(())
            }
        }
        want => match existing {
            Some(e) if e.sequence == want => Ok(()),
            Some(_) => Err(Error::invalid("invalid sequence number")),
            None => Err(Error::not_exist("no existing entry to match sequence against")),
        },
    }
}

enum FindError {
    Core(Error),
    FollowLink(DirEntry),
}

impl From<Error> for FindError {
    fn from(e: Error) -> Self {
        FindError::Core(e)
    }
}

fn find<'a>(node: &'a Node, elems: &[String]) -> Result<&'a Node, FindError> {
    if elems.is_empty() {
        return Ok(node);
    }
    if node.entry.attr.is_link() {
        return Err(FindError::FollowLink(node.entry.clone()));
    }
    let children = node
        .children
        .as_ref()
        .ok_or_else(|| Error::not_dir(format!("{} is not a directory", node.entry.name)))?;
    let child = children
        .get(&elems[0])
        .ok_or_else(|| Error::not_exist(format!("{} does not exist", node.entry.name)))?;
    find(child, &elems[1..])
}

/// Installs `incoming` at the path named by `elems` under `node`. Returns
/// the stored entry alongside its immediate parent's own entry, re-stamped
/// with a bumped `Sequence`, for the caller to log as a second `Put`
/// record. Ancestors further up are left with their sequence untouched
/// (only marked dirty, as before); only the direct parent's sequence
/// changes, matching what a single `Put` is defined to affect.
fn put_recursive(
    node: &mut Node,
    elems: &[String],
    mut incoming: DirEntry,
    time: u64,
) -> Result<(DirEntry, DirEntry), Error> {
    if node.entry.attr.is_link() {
        return Err(Error::broken_link(format!(
            "{} is a link, cannot traverse through it",
            node.entry.name
        )));
    }
    let children = node
        .children
        .as_mut()
        .ok_or_else(|| Error::not_dir(format!("{} is not a directory", node.entry.name)))?;
    let name = &elems[0];

    if elems.len() == 1 {
        let existing = children.get(name.as_str());
        check_sequence(existing.map(|n| &n.entry), incoming.sequence)?;
        incoming.sequence = existing.map_or(sequence::BASE, |n| n.entry.sequence + 1);
        incoming.time = time;

        let preserved_children = existing.and_then(|n| n.children.clone());
        let new_node = Node {
            entry: incoming.clone(),
            dirty: true,
            children: if incoming.attr.is_dir() {
                Some(preserved_children.unwrap_or_default())
            } else {
                None
            },
        };
        children.insert(name.clone(), new_node);
        node.dirty = true;
        node.entry.sequence += 1;
        node.entry.time = time;
        Ok((incoming, node.entry.clone()))
    } else {
        let child = children
            .get_mut(name.as_str())
            .ok_or_else(|| Error::not_exist(format!("{} does not exist", name)))?;
        let result = put_recursive(child, &elems[1..], incoming, time)?;
        node.dirty = true;
        Ok(result)
    }
}

fn put_dir_recursive(
    node: &mut Node,
    elems: &[String],
    mut subtree: Node,
    time: u64,
) -> Result<DirEntry, Error> {
    let children = node
        .children
        .as_mut()
        .ok_or_else(|| Error::not_dir(format!("{} is not a directory", node.entry.name)))?;
    let name = &elems[0];

    if elems.len() == 1 {
        let existing_seq = children.get(name.as_str()).map(|n| n.entry.sequence);
        subtree.entry.sequence = existing_seq.map_or(sequence::BASE, |s| s + 1);
        subtree.entry.time = time;
        subtree.dirty = true;
        let entry = subtree.entry.clone();
        children.insert(name.clone(), subtree);
        node.dirty = true;
        Ok(entry)
    } else {
        let child = children
            .get_mut(name.as_str())
            .ok_or_else(|| Error::not_exist(format!("{} does not exist", name)))?;
        let result = put_dir_recursive(child, &elems[1..], subtree, time)?;
        node.dirty = true;
        Ok(result)
    }
}

fn delete_recursive(node: &mut Node, elems: &[String]) -> Result<DirEntry, Error> {
    let children = node
        .children
        .as_mut()
        .ok_or_else(|| Error::not_dir(format!("{} is not a directory", node.entry.name)))?;
    let name = &elems[0];

    if elems.len() == 1 {
        let target = children
            .get(name.as_str())
            .ok_or_else(|| Error::not_exist(format!("{} does not exist", name)))?;
        if target.children.as_ref().is_some_and(|c| !c.is_empty()) {
            return Err(Error::not_empty(format!("{} is not empty", target.entry.name)));
        }
        let removed = children.remove(name.as_str()).expect("checked above").entry;
        node.dirty = true;
        Ok(removed)
    } else {
        let child = children
            .get_mut(name.as_str())
            .ok_or_else(|| Error::not_exist(format!("{} does not exist", name)))?;
        let result = delete_recursive(child, &elems[1..])?;
        node.dirty = true;
        Ok(result)
    }
}

fn flush_recursive<'a>(
    node: &'a mut Node,
    sink: &'a dyn FlushSink,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + Send + 'a>> {
    Box::pin(async move {
        let Some(children) = node.children.as_mut() else {
            return Ok(());
        };
        for child in children.values_mut() {
            flush_recursive(child, sink).await?;
        }

        if !node.dirty {
            return Ok(());
        }

        let mut child_names: Vec<&String> = children.keys().collect();
        child_names.sort();
        let mut block_data = Vec::new();
        for name in child_names {
            let child = &children[name];
            block_data.extend_from_slice(&codec::marshal(&child.entry));
        }

        let location = sink.put_block(block_data.clone()).await?;
        node.entry.blocks = vec![BlockDescriptor {
            location,
            offset: 0,
            size: block_data.len() as u64,
            packdata: vec![],
        }];
        sink.sign(&mut node.entry).await?;
        node.dirty = false;
        Ok(())
    })
}

fn apply_replayed(root: &mut Option<Node>, record: LogEntry) -> Result<(), Error> {
    let path_elems: Vec<String> = record.entry.name.elements().to_vec();

    match record.op {
        Op::Put => {
            if path_elems.is_empty() {
                let preserved = root.take().and_then(|n| n.children);
                let mut node = Node::new(record.entry);
                if node.is_dir() {
                    node.children = Some(preserved.unwrap_or_default());
                }
                *root = Some(node);
            } else {
                let root_node = root
                    .as_mut()
                    .ok_or_else(|| Error::internal("replayed a non-root Put before any root Put"))?;
                insert_replayed(root_node, &path_elems, record.entry)?;
            }
        }
        Op::Delete => {
            if path_elems.is_empty() {
                *root = None;
            } else if let Some(root_node) = root.as_mut() {
                remove_replayed(root_node, &path_elems);
            }
        }
    }
    Ok(())
}

fn insert_replayed(node: &mut Node, elems: &[String], entry: DirEntry) -> Result<(), Error> {
    let children = node
        .children
        .get_or_insert_with(HashMap::new);
    let name = &elems[0];
    if elems.len() == 1 {
        let preserved = children.get(name.as_str()).and_then(|n| n.children.clone());
        let mut new_node = Node::new(entry);
        if new_node.is_dir() {
            new_node.children = Some(preserved.unwrap_or_default());
        }
        children.insert(name.clone(), new_node);
    } else {
        let child = children
            .entry(name.clone())
            .or_insert_with(|| Node::new(placeholder_dir_entry()));
        insert_replayed(child, &elems[1..], entry)?;
    }
    Ok(())
}

fn remove_replayed(node: &mut Node, elems: &[String]) {
    let Some(children) = node.children.as_mut() else {
        return;
    };
    let name = &elems[0];
    if elems.len() == 1 {
        children.remove(name.as_str());
    } else if let Some(child) = children.get_mut(name.as_str()) {
        remove_replayed(child, &elems[1..]);
    }
}

/// A placeholder directory used only while replay reconstructs an
/// intermediate ancestor whose own Put record has not been seen yet
/// (parents are always logged before children in practice, since `Put`
/// requires the parent to exist — this exists purely so replay never
/// panics on a reordered or partial log).
fn placeholder_dir_entry() -> DirEntry {
    DirEntry {
        name: Path::parse("placeholder@invalid.invalid/").unwrap(),
        signed_name: Path::parse("placeholder@invalid.invalid/").unwrap(),
        attr: Attr::DIRECTORY,
        packing: upspin_types::Packing::Plain,
        writer: UserName::parse("placeholder@invalid.invalid").unwrap(),
        sequence: sequence::BASE,
        time: 0,
        blocks: vec![],
        packdata: vec![],
        link: None,
    }
}
