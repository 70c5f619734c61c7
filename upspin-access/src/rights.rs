use std::fmt;

/// A single right an `Access` file line can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Right {
    Read,
    Write,
    Create,
    Delete,
    List,
}

pub const ALL_RIGHTS: [Right; 5] = [
    Right::Read,
    Right::Write,
    Right::Create,
    Right::Delete,
    Right::List,
];

impl Right {
    /// Parses a rights keyword, accepting any single-letter prefix
    /// (`r|read`, `w|write`, `c|create`, `d|delete`, `l|list`) plus
    /// `a|all|*`, which expands to every right. Case-insensitive.
    pub fn parse(token: &str) -> Option<RightToken> {
        let lower = token.to_ascii_lowercase();
        match lower.as_str() {
            "r" | "read" => Some(RightToken::One(Right::Read)),
            "w" | "write" => Some(RightToken::One(Right::Write)),
            "c" | "create" => Some(RightToken::One(Right::Create)),
            "d" | "delete" => Some(RightToken::One(Right::Delete)),
            "l" | "list" => Some(RightToken::One(Right::List)),
            "a" | "all" | "*" => Some(RightToken::All),
            _ => None,
        }
    }
}

/// The result of parsing one rights token: either a single right or `all`.
pub enum RightToken {
    One(Right),
    All,
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Right::Read => "read",
            Right::Write => "write",
            Right::Create => "create",
            Right::Delete => "delete",
            Right::List => "list",
        };
        write!(f, "{s}")
    }
}
