//! `Glob`: shell-style pattern expansion over a tree, checking `list`
//! rights at every directory boundary crossed. Grounded on `glob::Pattern`
//! matched per path element, one directory listing at a time, rather than
//! a filesystem walk.

use upspin_path::{Path, UserName};
use upspin_types::Error;

use crate::server::{DirServer, Outcome};

/// Splits a glob pattern string (`user@domain/a/*/c`) into its owning user
/// and per-element patterns.
fn split_pattern(pattern: &str) -> Result<(UserName, Vec<glob::Pattern>), Error> {
    let mut parts = pattern.splitn(2, '/');
    let user_part = parts.next().unwrap_or("");
    let user = UserName::parse(user_part).map_err(|e| Error::invalid(e.to_string()))?;

    let elements = match parts.next() {
        Some(rest) if !rest.is_empty() => rest
            .split('/')
            .map(glob::Pattern::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::invalid(e.to_string()))?,
        _ => Vec::new(),
    };
    Ok((user, elements))
}

impl DirServer {
    /// Expands `pattern` over the caller's visible namespace. Directories
    /// the caller cannot `list` are dropped from the expansion silently,
    /// not surfaced as errors. A link crossed mid-expansion is returned as
    /// [`Outcome::FollowLink`] alongside whatever plain entries matched.
    #[tracing::instrument(skip(self), err, fields(pattern))]
    pub async fn glob(&self, caller: &UserName, pattern: &str) -> Result<Vec<Outcome>, Error> {
        let (user, elements) = split_pattern(pattern)?;
        let root = Path::parse(&user.to_string()).map_err(|e| Error::invalid(e.to_string()))?;

        let mut frontier = vec![root.clone()];
        let mut results = Vec::new();

        for (i, pat) in elements.iter().enumerate() {
            let is_last = i + 1 == elements.len();
            let mut next = Vec::new();

            for dir in frontier {
                let children = match self.list(caller, &dir).await {
                    Ok(children) => children,
                    Err(e) if e.kind == upspin_types::Kind::NotExist => continue,
                    Err(e) => return Err(e),
                };

                for child in children {
                    match child {
                        Outcome::FollowLink(link) => results.push(Outcome::FollowLink(link)),
                        Outcome::Entry(entry) => {
                            let name = entry.name.file_name().unwrap_or_default();
                            if !pat.matches(name) {
                                continue;
                            }
                            if is_last {
                                results.push(Outcome::Entry(entry));
                            } else if entry.attr.is_dir() {
                                next.push(entry.name);
                            }
                        }
                    }
                }
            }
            frontier = next;
        }

        if elements.is_empty() {
            // Bare user root: the single matching entry is the root itself.
            if let Ok(Outcome::Entry(entry)) = self.lookup(caller, &root).await {
                results.push(Outcome::Entry(entry));
            }
        }

        Ok(results)
    }
}
