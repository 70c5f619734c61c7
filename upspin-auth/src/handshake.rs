use ed25519_dalek::Signature;

use upspin_path::UserName;
use upspin_types::Endpoint;

/// Maximum acceptable clock skew before the handshake rejects outright.
pub const MAX_SKEW_SECS: u64 = 45;
/// Skew beyond which the handshake still accepts, but logs a warning.
pub const WARN_SKEW_SECS: u64 = 30;

/// The message a client signs to authenticate: `userName + " Authenticate
/// " + timestamp`.
pub fn client_auth_message(user: &UserName, timestamp: u64) -> Vec<u8> {
    format!("{user} Authenticate {timestamp}").into_bytes()
}

/// The message a server signs, in proxy mode, to prove its identity to
/// the proxied client: `serverName + " AuthenticateServer " + now`.
pub fn server_auth_message(server_name: &str, now: u64) -> Vec<u8> {
    format!("{server_name} AuthenticateServer {now}").into_bytes()
}

/// The first request on a connection, carried in transport headers.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    pub user: UserName,
    pub timestamp: u64,
    pub signature: Signature,
    /// The endpoint this session is bound to (the connection's peer
    /// address, or the proxy's declared destination).
    pub endpoint: Endpoint,
    /// Set when the client connected through a proxy that will forward
    /// to a named destination, requesting the server's own signature in
    /// return (step 5).
    pub proxy_mode: bool,
}

/// The server's answer: the bearer token plus, in proxy mode, the
/// server's signature over its own identity.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub token: String,
    pub server_signature: Option<ServerSignature>,
}

#[derive(Debug, Clone)]
pub struct ServerSignature {
    pub signature: Signature,
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkewError {
    #[error("timestamp skew {0}s exceeds the {MAX_SKEW_SECS}s bound")]
    TooSkewed(u64),
}

/// Checks `timestamp` against `now`, returning the skew in seconds.
/// Callers should `tracing::warn!` when the skew exceeds
/// [`WARN_SKEW_SECS`] but still accept up to [`MAX_SKEW_SECS`].
pub fn check_skew(timestamp: u64, now: u64) -> Result<u64, SkewError> {
    let skew = timestamp.abs_diff(now);
    if skew > MAX_SKEW_SECS {
        return Err(SkewError::TooSkewed(skew));
    }
    Ok(skew)
}
