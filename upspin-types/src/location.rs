use std::fmt;

/// An opaque content address produced by the packing layer. The store is
/// keyed only by references; nothing outside the packer interprets their
/// internal structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference(String);

impl Reference {
    pub fn new(s: impl Into<String>) -> Self {
        Reference(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Reference {
    fn from(s: String) -> Self {
        Reference(s)
    }
}

impl From<&str> for Reference {
    fn from(s: &str) -> Self {
        Reference(s.to_string())
    }
}

/// Transport a [`Location`]'s endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Unassigned,
    InProcess,
    Remote,
}

/// A network address a remote directory/store/key server listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub transport: Transport,
    pub net_address: String,
}

impl Endpoint {
    pub fn unassigned() -> Self {
        Endpoint {
            transport: Transport::Unassigned,
            net_address: String::new(),
        }
    }

    pub fn in_process() -> Self {
        Endpoint {
            transport: Transport::InProcess,
            net_address: String::new(),
        }
    }

    pub fn remote(net_address: impl Into<String>) -> Self {
        Endpoint {
            transport: Transport::Remote,
            net_address: net_address.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transport {
            Transport::Unassigned => write!(f, "unassigned"),
            Transport::InProcess => write!(f, "inprocess"),
            Transport::Remote => write!(f, "remote,{}", self.net_address),
        }
    }
}

/// A `(endpoint, reference)` pair naming where a block's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub endpoint: Endpoint,
    pub reference: Reference,
}
