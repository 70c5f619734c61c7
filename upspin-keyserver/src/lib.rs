//! Maps user names to `{directory endpoints, store endpoints, public
//! key}`. Two [`KeyStore`] backends (in-process, durable) sit behind one
//! [`KeyServer`] that enforces the self-write/admin/signup policy.

mod durable;
mod keystore;
mod memory;
mod record;
mod server;
mod signup;

pub use durable::DurableKeyStore;
pub use keystore::KeyStore;
pub use memory::InMemoryKeyStore;
pub use record::UserRecord;
pub use server::{AdminPolicy, Authority, KeyServer, NoAdmins};
pub use signup::{NoSignup, SignupProof, SignupVerifier};
