use crate::principal::Principal;
use crate::rights::{Right, RightToken, ALL_RIGHTS};
use std::collections::HashMap;
use upspin_path::Path;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{file}:{line}: {message}")]
pub struct ParseError {
    pub file: String,
    pub line: usize,
    pub message: String,
}

/// A parsed `Access` file: a set of rights-granting rules plus the identity
/// of the directory owner the file was found under.
#[derive(Debug, Clone)]
pub struct AccessFile {
    pub owner: upspin_path::UserName,
    pub path: Path,
    rules: HashMap<Right, Vec<Principal>>,
}

impl AccessFile {
    /// Parses the text of an `Access` file found at `path` (whose user
    /// determines the owner). `resolve_group` turns a bare principal token
    /// that isn't a user name or domain wildcard into a [`Path`] naming a
    /// group file — typically resolved relative to `path`'s directory.
    pub fn parse(
        path: &Path,
        contents: &str,
        mut resolve_group: impl FnMut(&str) -> Option<Path>,
    ) -> Result<Self, ParseError> {
        let file = path.to_string();
        let mut rules: HashMap<Right, Vec<Principal>> = HashMap::new();

        for (idx, raw_line) in contents.lines().enumerate() {
            let line_no = idx + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }

            let (rights_part, principals_part) = line.split_once(':').ok_or_else(|| ParseError {
                file: file.clone(),
                line: line_no,
                message: format!("missing ':' in line {raw_line:?}"),
            })?;

            let mut rights: Vec<Right> = Vec::new();
            for tok in split_list(rights_part) {
                match Right::parse(tok) {
                    Some(RightToken::One(r)) => rights.push(r),
                    Some(RightToken::All) => rights.extend_from_slice(&ALL_RIGHTS),
                    None => {
                        return Err(ParseError {
                            file: file.clone(),
                            line: line_no,
                            message: format!("unknown right {tok:?}"),
                        })
                    }
                }
            }
            if rights.is_empty() {
                return Err(ParseError {
                    file: file.clone(),
                    line: line_no,
                    message: "no rights given".to_string(),
                });
            }

            let mut principals = Vec::new();
            for tok in split_list(principals_part) {
                let p = Principal::parse(tok, &mut resolve_group).ok_or_else(|| ParseError {
                    file: file.clone(),
                    line: line_no,
                    message: format!("invalid principal {tok:?}"),
                })?;
                principals.push(p);
            }
            if principals.is_empty() {
                return Err(ParseError {
                    file: file.clone(),
                    line: line_no,
                    message: "no principals given".to_string(),
                });
            }

            for r in rights {
                rules.entry(r).or_default().extend(principals.clone());
            }
        }

        let owner = path.user().clone();
        Ok(AccessFile {
            owner,
            path: path.clone(),
            rules,
        })
    }

    pub fn principals_for(&self, right: Right) -> &[Principal] {
        self.rules.get(&right).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// A `Group` file: a plain list of principals.
#[derive(Debug, Clone)]
pub struct GroupFile {
    pub members: Vec<Principal>,
}

impl GroupFile {
    pub fn parse(
        path: &Path,
        contents: &str,
        mut resolve_group: impl FnMut(&str) -> Option<Path>,
    ) -> Result<Self, ParseError> {
        let file = path.to_string();
        let mut members = Vec::new();
        for (idx, raw_line) in contents.lines().enumerate() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            for tok in split_list(line) {
                let p = Principal::parse(tok, &mut resolve_group).ok_or_else(|| ParseError {
                    file: file.clone(),
                    line: idx + 1,
                    message: format!("invalid principal {tok:?}"),
                })?;
                members.push(p);
            }
        }
        Ok(GroupFile { members })
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Splits a token list on commas and/or whitespace, as both `Access` and
/// `Group` files allow either separator.
fn split_list(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
}
