use crate::error::Error;
use crate::location::Location;
use upspin_path::{Path, UserName};

/// Sentinel [`DirEntry::sequence`] values.
pub mod sequence {
    /// The value stamped on the first successful `Put` of a path.
    pub const BASE: i64 = 1;
    /// Skip the sequence check entirely.
    pub const IGNORE: i64 = -1;
    /// Assert the entry is new: the `Put` fails if the name already exists.
    pub const NOT_EXIST: i64 = -2;
}

/// Which packing scheme produced an entry's blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Packing {
    /// Identity transform; no encryption, no signature, no wrapping.
    Plain,
    /// Unencrypted but signed, so integrity and origin can be verified.
    EeIntegrity,
    /// Per-block symmetric key, wrapped per reader via ECDH.
    Ee,
    /// Reversible, human-readable packing used only in tests.
    Debug,
}

impl Packing {
    pub fn tag(self) -> u8 {
        match self {
            Packing::Plain => 0,
            Packing::EeIntegrity => 1,
            Packing::Ee => 2,
            Packing::Debug => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, Error> {
        match tag {
            0 => Ok(Packing::Plain),
            1 => Ok(Packing::EeIntegrity),
            2 => Ok(Packing::Ee),
            3 => Ok(Packing::Debug),
            other => Err(Error::invalid(format!("unknown packing tag {other}"))),
        }
    }
}

/// A disjoint subset of attributes on a [`DirEntry`]. A plain file has none
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Attr(u8);

impl Attr {
    pub const NONE: Attr = Attr(0);
    pub const DIRECTORY: Attr = Attr(1 << 0);
    pub const LINK: Attr = Attr(1 << 1);
    pub const INCOMPLETE: Attr = Attr(1 << 2);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Attr(bits)
    }

    pub fn contains(self, other: Attr) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_dir(self) -> bool {
        self.contains(Attr::DIRECTORY)
    }

    pub fn is_link(self) -> bool {
        self.contains(Attr::LINK)
    }

    pub fn is_incomplete(self) -> bool {
        self.contains(Attr::INCOMPLETE)
    }

    pub fn with(self, other: Attr) -> Attr {
        Attr(self.0 | other.0)
    }

    pub fn without(self, other: Attr) -> Attr {
        Attr(self.0 & !other.0)
    }
}

impl std::ops::BitOr for Attr {
    type Output = Attr;
    fn bitor(self, rhs: Attr) -> Attr {
        self.with(rhs)
    }
}

/// One block of a file's contents: `{location, offset, size, packdata}`.
/// The invariant `offset[i+1] == offset[i] + size[i]` holds for any two
/// consecutive blocks of the same entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub location: Location,
    pub offset: u64,
    pub size: u64,
    pub packdata: Vec<u8>,
}

/// The fundamental unit of the namespace: a file, directory, or link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Canonical path name.
    pub name: Path,
    /// The name as originally signed; differs from `name` only through
    /// renames/duplicates so the signature still verifies.
    pub signed_name: Path,
    pub attr: Attr,
    pub packing: Packing,
    pub writer: UserName,
    pub sequence: i64,
    /// Last modification time, seconds since epoch.
    pub time: u64,
    pub blocks: Vec<BlockDescriptor>,
    /// Cryptographic material: wrapped keys, signature, or HMAC, depending
    /// on `packing`.
    pub packdata: Vec<u8>,
    /// Target path, set only for [`Attr::LINK`] entries.
    pub link: Option<Path>,
}

impl DirEntry {
    /// Checks the structural invariants from the data model: ascending,
    /// contiguous block offsets; links carry no blocks but a target; plain
    /// files/directories carry no link target.
    pub fn validate(&self) -> Result<(), Error> {
        if self.attr.is_link() {
            if self.link.is_none() {
                return Err(Error::invalid("link entry missing link target"));
            }
            if !self.blocks.is_empty() {
                return Err(Error::invalid("link entry must not have blocks"));
            }
        } else if self.link.is_some() {
            return Err(Error::invalid("non-link entry must not have a link target"));
        }

        let mut expected_offset = 0u64;
        for b in &self.blocks {
            if b.offset != expected_offset {
                return Err(Error::invalid("block offsets are not contiguous"));
            }
            expected_offset = b
                .offset
                .checked_add(b.size)
                .ok_or_else(|| Error::invalid("block size overflow"))?;
        }

        if self.name.is_root() && !self.name.to_string().ends_with('/') {
            return Err(Error::invalid("root entry name must end in '/'"));
        }

        Ok(())
    }

    pub fn is_incomplete(&self) -> bool {
        self.attr.is_incomplete()
    }

    /// Strips block locations and packdata, and sets [`Attr::INCOMPLETE`],
    /// as required for a caller who has `list` but not `read`.
    pub fn into_incomplete(mut self) -> Self {
        self.blocks.clear();
        self.packdata.clear();
        self.attr = self.attr.with(Attr::INCOMPLETE);
        self
    }
}
