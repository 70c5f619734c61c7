use std::sync::Arc;

use upspin_path::UserName;
use upspin_types::Error;

use crate::keystore::KeyStore;
use crate::record::UserRecord;
use crate::signup::{SignupProof, SignupVerifier};

/// Decides which callers hold the admin right: they may write any user's
/// record, including creating brand-new ones without a signup proof.
/// Grounded on the access evaluator's injected `GroupLoader` seam —
/// policy is a capability the caller supplies, not something this crate
/// hardcodes.
pub trait AdminPolicy: Send + Sync {
    fn is_admin(&self, user: &UserName) -> bool;
}

/// An admin policy naming nobody, for deployments with no administrators.
pub struct NoAdmins;

impl AdminPolicy for NoAdmins {
    fn is_admin(&self, _user: &UserName) -> bool {
        false
    }
}

/// Authority under which a [`KeyServer::put`] call runs.
pub enum Authority<'a> {
    /// The caller is writing their own record.
    SelfWrite,
    /// The caller holds the admin right.
    Admin,
    /// The caller is creating a brand-new user and presents a proof from
    /// the signup service.
    Signup(&'a SignupProof),
}

/// The key server: user name -> `{endpoints, public key}`, with the
/// self-write/admin/signup policy from §4.6 layered over a [`KeyStore`].
pub struct KeyServer {
    store: Arc<dyn KeyStore>,
    admins: Arc<dyn AdminPolicy>,
    signup: Arc<dyn SignupVerifier>,
}

fn is_wildcard(user: &UserName) -> bool {
    user.local() == "*"
}

impl KeyServer {
    pub fn new(
        store: Arc<dyn KeyStore>,
        admins: Arc<dyn AdminPolicy>,
        signup: Arc<dyn SignupVerifier>,
    ) -> Self {
        KeyServer {
            store,
            admins,
            signup,
        }
    }

    /// Looks up `user`'s record. Lookups carry no restriction — every
    /// record is public, the same way a TLS certificate or a phone-book
    /// entry is.
    #[tracing::instrument(skip_all, err, fields(user = %user))]
    pub async fn lookup(&self, user: &UserName) -> Result<UserRecord, Error> {
        if is_wildcard(user) {
            return Err(Error::invalid("wildcard names are not valid key-server keys"));
        }
        self.store
            .get(user)
            .await?
            .ok_or_else(|| Error::not_exist(format!("no key record for {user}")))
    }

    /// Writes `record` under `caller`'s authority. `caller` must equal
    /// `record.name` (self-write), hold the admin right, or — if
    /// `record.name` has no existing record yet — present a valid signup
    /// proof.
    #[tracing::instrument(skip_all, err, fields(caller = %caller, user = %record.name))]
    pub async fn put(
        &self,
        caller: &UserName,
        record: UserRecord,
        authority: Authority<'_>,
    ) -> Result<(), Error> {
        if is_wildcard(&record.name) {
            return Err(Error::invalid("wildcard names are not valid key-server keys"));
        }

        let existing = self.store.get(&record.name).await?;

        match authority {
            Authority::Admin => {
                if !self.admins.is_admin(caller) {
                    return Err(Error::permission(format!("{caller} is not an admin")));
                }
            }
            Authority::SelfWrite => {
                if caller != &record.name {
                    return Err(Error::permission(format!(
                        "{caller} may not write {}'s record",
                        record.name
                    )));
                }
                if existing.is_none() {
                    return Err(Error::permission(
                        "creating a new user requires admin authority or a signup proof",
                    ));
                }
            }
            Authority::Signup(proof) => {
                if existing.is_some() {
                    return Err(Error::permission(
                        "a signup proof only authorizes creating a brand-new user",
                    ));
                }
                if !self.signup.verify(&record.name, proof) {
                    return Err(Error::permission("signup proof did not verify"));
                }
            }
        }

        self.store.put(&record).await
    }
}
