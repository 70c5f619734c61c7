//! The authenticated RPC substrate: the challenge/response session
//! handshake, the process-wide bearer-token cache, and the proxy-mode
//! server signature, all of spec §4.7.

mod handshake;
mod keylookup;
mod server;
mod session;
mod time;
mod token;

pub use handshake::{
    check_skew, client_auth_message, server_auth_message, HandshakeRequest, HandshakeResponse,
    ServerSignature, SkewError, MAX_SKEW_SECS, WARN_SKEW_SECS,
};
pub use keylookup::{KeyServerLookup, PublicKeyLookup};
pub use server::{AuthServer, DEFAULT_SESSION_CAPACITY};
pub use session::{Session, SessionCache, TOKEN_LIFETIME_SECS};
pub use time::{FixedTimeSource, SystemTimeSource, TimeSource};
pub use token::generate_token;
