use upspin_path::UserName;

/// An opaque proof handed to the key server by an out-of-band signup
/// service (email verification, per §6) attesting that `user` completed
/// signup. The key server never interprets the proof itself; it only
/// asks the injected [`SignupVerifier`] whether it is valid.
#[derive(Debug, Clone)]
pub struct SignupProof(pub String);

/// Verifies a [`SignupProof`] presented for a brand-new user. The core
/// treats the signup service as an external collaborator (§1); this
/// trait is the seam where that collaborator's verdict enters the key
/// server.
pub trait SignupVerifier: Send + Sync {
    fn verify(&self, user: &UserName, proof: &SignupProof) -> bool;
}

/// A verifier that accepts nothing, for deployments/tests with no
/// signup flow wired up (new users can then only be created by an
/// admin).
pub struct NoSignup;

impl SignupVerifier for NoSignup {
    fn verify(&self, _user: &UserName, _proof: &SignupProof) -> bool {
        false
    }
}
