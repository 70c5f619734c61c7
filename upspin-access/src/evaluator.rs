use crate::parse::{AccessFile, GroupFile, ParseError};
use crate::principal::Principal;
use crate::rights::Right;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use upspin_path::{Path, UserName};

/// Injected by the caller (normally the directory server) to load a group
/// file's bytes by path, so the evaluator can expand group references
/// lazily without knowing how trees are stored.
#[async_trait]
pub trait GroupLoader: Send + Sync {
    /// Returns `Ok(None)` if the group file does not exist. I/O failures
    /// (store unreachable, etc.) are treated the same as "not found yet":
    /// the group path is reported back via [`CanResult::missing_groups`] so
    /// the caller can retry `can` after loading it.
    async fn load_group(&self, path: &Path) -> Result<Option<String>, String>;
}

/// Outcome of a [`can`] call.
#[derive(Debug, Clone, Default)]
pub struct CanResult {
    pub permitted: bool,
    pub missing_groups: Vec<Path>,
}

/// Answers whether `user` holds `right` on `path`, given the `Access` file
/// governing `path`'s directory.
///
/// The tree owner implicitly holds `read`, `list` and `delete` on every
/// path they own, regardless of what the `Access` file says.
pub async fn can(
    user: &UserName,
    right: Right,
    path: &Path,
    access: &AccessFile,
    loader: &dyn GroupLoader,
) -> Result<CanResult, ParseError> {
    if user == &access.owner && matches!(right, Right::Read | Right::List | Right::Delete) {
        return Ok(CanResult {
            permitted: true,
            missing_groups: vec![],
        });
    }

    let (permitted, missing_groups) = matches_any(user, access.principals_for(right), loader).await?;
    let _ = path; // the Access file already pins the directory being checked
    Ok(CanResult {
        permitted,
        missing_groups,
    })
}

/// Only the tree owner may write an `Access` file; any non-owner needs
/// `read` on its directory to merely read one.
pub fn owner_may_write_access(user: &UserName, access_file_path: &Path) -> bool {
    user == access_file_path.user()
}

/// Breadth-first expansion of a principal list, following `Group`
/// references through `loader`. A `visited` set of group paths breaks
/// cycles: a group already on the expansion path is treated as empty
/// rather than as an error.
async fn matches_any(
    user: &UserName,
    principals: &[Principal],
    loader: &dyn GroupLoader,
) -> Result<(bool, Vec<Path>), ParseError> {
    let mut visited: HashSet<Path> = HashSet::new();
    let mut missing = Vec::new();
    let mut queue: VecDeque<Principal> = principals.iter().cloned().collect();

    while let Some(p) = queue.pop_front() {
        match p {
            Principal::User(u) => {
                if u == *user {
                    return Ok((true, missing));
                }
            }
            Principal::DomainWildcard(domain) => {
                if user.matches_domain_wildcard(&domain) {
                    return Ok((true, missing));
                }
            }
            Principal::Group(group_path) => {
                if !visited.insert(group_path.clone()) {
                    // Already expanding this group: cycle, treat as empty.
                    continue;
                }

                let bytes = match loader.load_group(&group_path).await {
                    Ok(Some(b)) => b,
                    Ok(None) | Err(_) => {
                        missing.push(group_path);
                        continue;
                    }
                };

                let group = GroupFile::parse(&group_path, &bytes, |_| None)?;
                queue.extend(group.members);
            }
        }
    }

    Ok((false, missing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapLoader(Mutex<HashMap<String, String>>);

    #[async_trait]
    impl GroupLoader for MapLoader {
        async fn load_group(&self, path: &Path) -> Result<Option<String>, String> {
            Ok(self.0.lock().unwrap().get(&path.to_string()).cloned())
        }
    }

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }
    fn u(s: &str) -> UserName {
        UserName::parse(s).unwrap()
    }

    #[tokio::test]
    async fn owner_has_implicit_rights() {
        let path = p("ann@example.com/Access");
        let access = AccessFile::parse(&path, "", |_| None).unwrap();
        let loader = MapLoader(Mutex::new(HashMap::new()));
        let result = can(&u("ann@example.com"), Right::Read, &path, &access, &loader)
            .await
            .unwrap();
        assert!(result.permitted);
        // owner does NOT get an implicit `write`
        let result = can(&u("ann@example.com"), Right::Write, &path, &access, &loader)
            .await
            .unwrap();
        assert!(!result.permitted);
    }

    #[tokio::test]
    async fn non_owner_requires_explicit_grant() {
        let path = p("ann@example.com/Access");
        let access = AccessFile::parse(&path, "r: bob@foo.com\n", |_| None).unwrap();
        let loader = MapLoader(Mutex::new(HashMap::new()));
        let result = can(&u("bob@foo.com"), Right::Read, &path, &access, &loader)
            .await
            .unwrap();
        assert!(result.permitted);
        let result = can(&u("carl@foo.com"), Right::Read, &path, &access, &loader)
            .await
            .unwrap();
        assert!(!result.permitted);
    }

    #[tokio::test]
    async fn group_cycle_terminates_and_is_treated_as_empty() {
        let access_path = p("ann@example.com/Access");
        let group_a = p("ann@example.com/Group/a");
        let group_b = p("ann@example.com/Group/b");

        let mut map = HashMap::new();
        map.insert(group_a.to_string(), "ann@example.com/Group/b\n".to_string());
        map.insert(group_b.to_string(), "ann@example.com/Group/a\n".to_string());
        let loader = MapLoader(Mutex::new(map));

        let access = AccessFile::parse(&access_path, "r: ann@example.com/Group/a\n", |tok| {
            Path::parse(tok).ok()
        })
        .unwrap();

        let result = can(&u("carl@foo.com"), Right::Read, &access_path, &access, &loader)
            .await
            .unwrap();
        assert!(!result.permitted);
        assert!(result.missing_groups.is_empty());
    }

    #[tokio::test]
    async fn missing_group_is_reported_not_errored() {
        let access_path = p("ann@example.com/Access");
        let group = p("ann@example.com/Group/friends");
        let access = AccessFile::parse(&access_path, "r: ann@example.com/Group/friends\n", |tok| {
            Path::parse(tok).ok()
        })
        .unwrap();
        let loader = MapLoader(Mutex::new(HashMap::new()));

        let result = can(&u("bob@foo.com"), Right::Read, &access_path, &access, &loader)
            .await
            .unwrap();
        assert!(!result.permitted);
        assert_eq!(result.missing_groups, vec![group]);
    }
}
