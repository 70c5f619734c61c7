use std::fmt;
use tonic::Status;

/// The error taxonomy every core operation reports through. A `Kind` by
/// itself never carries a message; it classifies how callers should react
/// (retry, surface to a human, map to a transport status, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Malformed input (path, sequence, access file).
    Invalid,
    /// Authenticated caller lacks the required right.
    Permission,
    /// Target absent, or hidden by access policy.
    NotExist,
    /// Target already present (e.g. create-only collision).
    Exist,
    /// Directory cannot be deleted while children remain.
    NotEmpty,
    /// Expected a directory, found something else.
    NotDir,
    /// Expected a file, found a directory.
    IsDir,
    /// Storage or network failure.
    Io,
    /// Invariant violation; indicates a bug.
    Internal,
    /// Link resolution failed after redirect.
    BrokenLink,
    /// Packing could not unwrap/decode.
    CannotDecrypt,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Invalid => "invalid",
            Kind::Permission => "permission denied",
            Kind::NotExist => "not exist",
            Kind::Exist => "already exists",
            Kind::NotEmpty => "not empty",
            Kind::NotDir => "not a directory",
            Kind::IsDir => "is a directory",
            Kind::Io => "I/O error",
            Kind::Internal => "internal error",
            Kind::BrokenLink => "broken link",
            Kind::CannotDecrypt => "cannot decrypt",
        };
        write!(f, "{s}")
    }
}

/// A kind-tagged error carrying the path/user context a caller needs to act
/// on it, shared across every core crate the way `castore::Error` is shared
/// across the teacher's blob/directory services.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: Kind,
    pub message: String,
}

impl Error {
    pub fn new(kind: Kind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(Kind::Invalid, message)
    }
    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(Kind::Permission, message)
    }
    pub fn not_exist(message: impl Into<String>) -> Self {
        Self::new(Kind::NotExist, message)
    }
    pub fn exist(message: impl Into<String>) -> Self {
        Self::new(Kind::Exist, message)
    }
    pub fn not_empty(message: impl Into<String>) -> Self {
        Self::new(Kind::NotEmpty, message)
    }
    pub fn not_dir(message: impl Into<String>) -> Self {
        Self::new(Kind::NotDir, message)
    }
    pub fn is_dir(message: impl Into<String>) -> Self {
        Self::new(Kind::IsDir, message)
    }
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(Kind::Io, message)
    }
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Kind::Internal, message)
    }
    pub fn broken_link(message: impl Into<String>) -> Self {
        Self::new(Kind::BrokenLink, message)
    }
    pub fn cannot_decrypt(message: impl Into<String>) -> Self {
        Self::new(Kind::CannotDecrypt, message)
    }

    /// Maps any non-owner-visible error on a path the caller cannot `list`
    /// down to [`Kind::NotExist`], so permission denials cannot be used to
    /// probe the namespace (see the directory server's failure semantics).
    pub fn hide_as_not_exist(self) -> Self {
        Error::new(Kind::NotExist, self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        use std::io::ErrorKind as K;
        let kind = match value.kind() {
            K::NotFound => Kind::NotExist,
            K::AlreadyExists => Kind::Exist,
            K::InvalidInput | K::InvalidData => Kind::Invalid,
            _ => Kind::Io,
        };
        Error::new(kind, value.to_string())
    }
}

impl From<Error> for Status {
    fn from(value: Error) -> Self {
        match value.kind {
            Kind::Invalid => Status::invalid_argument(value.message),
            Kind::Permission => Status::permission_denied(value.message),
            Kind::NotExist => Status::not_found(value.message),
            Kind::Exist => Status::already_exists(value.message),
            Kind::NotEmpty => Status::failed_precondition(value.message),
            Kind::NotDir => Status::failed_precondition(value.message),
            Kind::IsDir => Status::failed_precondition(value.message),
            Kind::Io => Status::data_loss(value.message),
            Kind::Internal => Status::internal(value.message),
            Kind::BrokenLink => Status::failed_precondition(value.message),
            Kind::CannotDecrypt => Status::data_loss(value.message),
        }
    }
}

impl From<Status> for Error {
    fn from(value: Status) -> Self {
        use tonic::Code;
        let kind = match value.code() {
            Code::InvalidArgument => Kind::Invalid,
            Code::PermissionDenied | Code::Unauthenticated => Kind::Permission,
            Code::NotFound => Kind::NotExist,
            Code::AlreadyExists => Kind::Exist,
            Code::FailedPrecondition => Kind::Invalid,
            Code::DataLoss => Kind::Io,
            _ => Kind::Internal,
        };
        Error::new(kind, value.message().to_string())
    }
}
