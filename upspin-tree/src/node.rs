use std::collections::HashMap;

use upspin_types::DirEntry;

/// One entry in the in-memory directory tree: a [`DirEntry`] plus, for
/// directories, its loaded children. `dirty` marks a node whose in-memory
/// state has not yet been serialized to a block by `Flush`.
#[derive(Debug, Clone)]
pub struct Node {
    pub entry: DirEntry,
    pub dirty: bool,
    pub children: Option<HashMap<String, Node>>,
}

impl Node {
    pub fn new(entry: DirEntry) -> Self {
        let children = entry.attr.is_dir().then(HashMap::new);
        Node {
            entry,
            dirty: false,
            children,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.children.is_some()
    }
}
