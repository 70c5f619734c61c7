use upspin_path::{Path, UserName};

/// One entry on the right-hand side of an `Access`/`Group` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User(UserName),
    DomainWildcard(String),
    /// A path to a `Group` file, expanded lazily during evaluation.
    Group(Path),
}

impl Principal {
    /// Parses a single principal token. A bare `user@domain` is a [`Principal::User`];
    /// `*@domain` is a [`Principal::DomainWildcard`]; anything else is treated as a
    /// path to a group file (resolved relative to the access file's directory by
    /// the caller before constructing the [`Path`]).
    pub fn parse(token: &str, resolve_group: impl FnOnce(&str) -> Option<Path>) -> Option<Self> {
        if let Some(domain) = token.strip_prefix("*@") {
            if domain.is_empty() {
                return None;
            }
            return Some(Principal::DomainWildcard(domain.to_ascii_lowercase()));
        }
        if let Ok(user) = UserName::parse(token) {
            return Some(Principal::User(user));
        }
        resolve_group(token).map(Principal::Group)
    }
}
