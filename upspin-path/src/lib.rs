//! Parsing, cleaning and comparison of Upspin path names.
//!
//! A path name is rooted at a user identity: `ann@example.com/photos/2016/x.jpg`.
//! This crate knows nothing about directory trees, access control or
//! storage — it only parses, normalizes and compares names.

use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::str::FromStr;

mod user;
pub use user::{UserName, UserNameError};

/// Maximum length, in bytes, of a single path element.
pub const MAX_ELEMENT_LEN: usize = 255;
/// Maximum length, in bytes, of an entire path (user name plus elements).
pub const MAX_PATH_LEN: usize = 32 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid user name: {0}")]
    User(#[from] UserNameError),
    #[error("path element too long: {0} bytes")]
    ElementTooLong(usize),
    #[error("path too long: {0} bytes")]
    PathTooLong(usize),
    #[error("empty path element")]
    EmptyElement,
}

/// A fully parsed Upspin path name: a [`UserName`] plus an ordered list of
/// `/`-separated elements. Elements never contain `/` and are never empty
/// after [`Path::clean`]-style parsing.
#[derive(Debug, Clone, Eq, Hash)]
pub struct Path {
    user: UserName,
    elems: Vec<String>,
}

impl Path {
    /// Parses and validates a path name of the form `user@domain[/element]*[/]`.
    ///
    /// Cleans `.`/`..` and duplicate separators along the way, so
    /// `parse(p).to_string() == parse(clean_string(p)).to_string()` for any `p`.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if s.len() > MAX_PATH_LEN {
            return Err(PathError::PathTooLong(s.len()));
        }

        let (user_part, rest) = match s.split_once('/') {
            Some((u, r)) => (u, r),
            None => (s, ""),
        };

        let user = UserName::parse(user_part)?;
        let elems = clean_elements(rest)?;

        Ok(Path { user, elems })
    }

    /// The user this path is rooted at.
    pub fn user(&self) -> &UserName {
        &self.user
    }

    /// The `/`-separated elements after the user name, in order.
    pub fn elements(&self) -> &[String] {
        &self.elems
    }

    /// Number of elements after the user name. The root has zero.
    pub fn element_count(&self) -> usize {
        self.elems.len()
    }

    /// True if this path names the user's root directory.
    pub fn is_root(&self) -> bool {
        self.elems.is_empty()
    }

    /// A new `Path` containing only the first `n` elements (clamped to
    /// [`element_count`](Self::element_count)). Used to walk from a path up
    /// toward the root, e.g. to find a governing `Access` file.
    pub fn first_n_elements(&self, n: usize) -> Path {
        let n = n.min(self.elems.len());
        Path {
            user: self.user.clone(),
            elems: self.elems[..n].to_vec(),
        }
    }

    /// A new `Path` with the last `n` elements removed (clamped at the root).
    pub fn drop_last_n_elements(&self, n: usize) -> Path {
        let keep = self.elems.len().saturating_sub(n);
        self.first_n_elements(keep)
    }

    /// The parent directory of this path, or `None` if this path is already
    /// the root.
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            None
        } else {
            Some(self.drop_last_n_elements(1))
        }
    }

    /// The final element's name, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.elems.last().map(|s| s.as_str())
    }

    /// Returns a new path with `name` appended as a final element.
    pub fn join(&self, name: &str) -> Result<Path, PathError> {
        if name.is_empty() {
            return Err(PathError::EmptyElement);
        }
        if name.as_bytes().contains(&b'/') {
            return Err(PathError::EmptyElement);
        }
        if name.len() > MAX_ELEMENT_LEN {
            return Err(PathError::ElementTooLong(name.len()));
        }
        let mut elems = self.elems.clone();
        elems.push(name.to_string());
        Ok(Path {
            user: self.user.clone(),
            elems,
        })
    }

    /// Whether `self` is `other` or a descendant of `other`.
    pub fn has_prefix(&self, other: &Path) -> bool {
        self.user == other.user
            && other.elems.len() <= self.elems.len()
            && self.elems[..other.elems.len()] == other.elems[..]
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user)?;
        for e in &self.elems {
            write!(f, "/{e}")?;
        }
        if self.elems.is_empty() {
            write!(f, "/")?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.user == other.user && self.elems == other.elems
    }
}

/// Orders by `(domain, user, elements)`, lexicographically, matching the
/// ordering a directory listing or a Glob match should present.
impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user
            .domain()
            .cmp(other.user.domain())
            .then_with(|| self.user.local().cmp(other.user.local()))
            .then_with(|| self.elems.cmp(&other.elems))
    }
}

/// Cleans a `/`-separated element string: resolves `.` and `..` (`..` at the
/// root is a no-op, it never escapes above the user root) and collapses
/// duplicate separators. Returns the resulting elements.
fn clean_elements(s: &str) -> Result<Vec<String>, PathError> {
    let mut out: Vec<String> = Vec::new();
    for raw in s.split('/') {
        if raw.is_empty() || raw == "." {
            continue;
        }
        if raw == ".." {
            out.pop();
            continue;
        }
        if raw.len() > MAX_ELEMENT_LEN {
            return Err(PathError::ElementTooLong(raw.len()));
        }
        out.push(raw.to_string());
    }
    Ok(out)
}

/// Cleans a full path string (`user@domain[/element]*`), resolving `.`/`..`
/// and duplicate separators, without fully parsing+validating the user part.
/// `clean(clean(p)) == clean(p)` and parsing commutes with cleaning, as
/// required by the path-cleaning testable property.
pub fn clean(s: &str) -> Result<String, PathError> {
    Ok(Path::parse(s)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_root() {
        let p = Path::parse("ann@example.com").unwrap();
        assert!(p.is_root());
        assert_eq!(p.to_string(), "ann@example.com/");
    }

    #[test]
    fn parse_with_trailing_slash() {
        let p = Path::parse("ann@example.com/").unwrap();
        assert!(p.is_root());
    }

    #[test]
    fn parse_elements() {
        let p = Path::parse("ann@example.com/photos/2016/x.jpg").unwrap();
        assert_eq!(p.element_count(), 3);
        assert_eq!(p.elements(), ["photos", "2016", "x.jpg"]);
        assert_eq!(p.to_string(), "ann@example.com/photos/2016/x.jpg");
    }

    #[test]
    fn clean_dot_and_dotdot() {
        let p = Path::parse("ann@example.com/a/./b/../c").unwrap();
        assert_eq!(p.elements(), ["a", "c"]);
    }

    #[test]
    fn dotdot_at_root_is_noop() {
        let p = Path::parse("ann@example.com/../../a").unwrap();
        assert_eq!(p.elements(), ["a"]);
    }

    #[test]
    fn collapses_duplicate_separators() {
        let p = Path::parse("ann@example.com//a///b/").unwrap();
        assert_eq!(p.elements(), ["a", "b"]);
    }

    #[test]
    fn clean_is_idempotent() {
        let inputs = [
            "ann@example.com/a/./b/../c",
            "ann@example.com//a///b/",
            "ann@example.com/../../a",
            "ann@example.com",
        ];
        for s in inputs {
            let once = clean(s).unwrap();
            let twice = clean(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn parse_commutes_with_clean() {
        let s = "ann@example.com/a/./b/../c/";
        let cleaned = clean(s).unwrap();
        assert_eq!(Path::parse(s).unwrap().to_string(), cleaned);
        assert_eq!(Path::parse(&cleaned).unwrap().to_string(), cleaned);
    }

    #[test]
    fn first_n_and_drop_last_n() {
        let p = Path::parse("ann@example.com/a/b/c").unwrap();
        assert_eq!(p.first_n_elements(2).to_string(), "ann@example.com/a/b");
        assert_eq!(p.drop_last_n_elements(1).to_string(), "ann@example.com/a/b");
        assert_eq!(p.first_n_elements(0).to_string(), "ann@example.com/");
    }

    #[test]
    fn ordering_by_domain_user_elements() {
        let a = Path::parse("ann@example.com/a").unwrap();
        let b = Path::parse("bob@example.com/a").unwrap();
        let c = Path::parse("ann@zzz.com/a").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn has_prefix() {
        let parent = Path::parse("ann@example.com/a").unwrap();
        let child = Path::parse("ann@example.com/a/b").unwrap();
        assert!(child.has_prefix(&parent));
        assert!(!parent.has_prefix(&child));
    }

    #[test]
    fn rejects_oversized_path() {
        let long = "x".repeat(MAX_PATH_LEN + 1);
        assert!(matches!(
            Path::parse(&format!("ann@example.com/{long}")),
            Err(PathError::PathTooLong(_))
        ));
    }
}
