use std::fmt::{self, Display};

/// Maximum length, in bytes, of a user name (`local@domain`).
pub const MAX_USER_NAME_LEN: usize = 254;
/// Maximum length, in bytes, of a single domain label.
pub const MAX_DOMAIN_LABEL_LEN: usize = 63;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UserNameError {
    #[error("missing '@' in user name {0:?}")]
    MissingAt(String),
    #[error("empty local part in user name {0:?}")]
    EmptyLocal(String),
    #[error("empty domain in user name {0:?}")]
    EmptyDomain(String),
    #[error("domain {0:?} has no dot")]
    DomainNoDot(String),
    #[error("domain label {0:?} exceeds {MAX_DOMAIN_LABEL_LEN} bytes")]
    LabelTooLong(String),
    #[error("user name {0:?} exceeds {MAX_USER_NAME_LEN} bytes")]
    TooLong(String),
    #[error("user name {0:?} contains a path separator")]
    ContainsSlash(String),
}

/// A parsed Upspin user identity: `local@domain`.
///
/// Domain names are canonicalized to lower case; the local part is kept
/// case-sensitive, matching the grammar in the data model.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct UserName {
    local: String,
    domain: String,
}

impl UserName {
    pub fn parse(s: &str) -> Result<Self, UserNameError> {
        if s.len() > MAX_USER_NAME_LEN {
            return Err(UserNameError::TooLong(s.to_string()));
        }

        let at = s
            .rfind('@')
            .ok_or_else(|| UserNameError::MissingAt(s.to_string()))?;
        let (local, domain) = (&s[..at], &s[at + 1..]);

        if local.contains('/') || domain.contains('/') {
            return Err(UserNameError::ContainsSlash(s.to_string()));
        }
        if local.is_empty() {
            return Err(UserNameError::EmptyLocal(s.to_string()));
        }
        if domain.is_empty() {
            return Err(UserNameError::EmptyDomain(s.to_string()));
        }
        if !domain.contains('.') {
            return Err(UserNameError::DomainNoDot(s.to_string()));
        }
        for label in domain.split('.') {
            if label.len() > MAX_DOMAIN_LABEL_LEN {
                return Err(UserNameError::LabelTooLong(label.to_string()));
            }
        }

        Ok(UserName {
            local: local.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// True if `self`'s domain matches `*@domain` exactly (no sub-domain
    /// match), as used by Access-file wildcard principals.
    pub fn matches_domain_wildcard(&self, domain: &str) -> bool {
        self.domain.eq_ignore_ascii_case(domain)
    }

    /// A snapshot identity for this user: `local+snapshot@domain`.
    pub fn snapshot_user(&self) -> UserName {
        UserName {
            local: format!("{}+snapshot", self.local),
            domain: self.domain.clone(),
        }
    }

    /// True if this is already a `+snapshot` identity.
    pub fn is_snapshot(&self) -> bool {
        self.local.ends_with("+snapshot")
    }

    /// The base user of a `+snapshot` identity, if this is one.
    pub fn base_user(&self) -> Option<UserName> {
        self.local.strip_suffix("+snapshot").map(|local| UserName {
            local: local.to_string(),
            domain: self.domain.clone(),
        })
    }
}

impl Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}
