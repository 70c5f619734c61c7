use std::num::NonZeroUsize;
use std::sync::Arc;

use upspin_pack::{verify, Factotum};
use upspin_path::UserName;
use upspin_types::Error;

use crate::handshake::{
    check_skew, client_auth_message, server_auth_message, HandshakeRequest, HandshakeResponse,
    ServerSignature, WARN_SKEW_SECS,
};
use crate::keylookup::PublicKeyLookup;
use crate::session::{Session, SessionCache, TOKEN_LIFETIME_SECS};
use crate::time::TimeSource;
use crate::token::generate_token;

/// Default session-cache capacity. Arbitrary but generous; real
/// deployments size this to their concurrent-session count.
pub const DEFAULT_SESSION_CAPACITY: usize = 10_000;

/// Runs the handshake and subsequent per-token authentication for one
/// process's directory/store/key RPC servers, which share one
/// [`SessionCache`] (spec §4.7: "session cache is process-wide").
pub struct AuthServer {
    keys: Arc<dyn PublicKeyLookup>,
    time: Arc<dyn TimeSource>,
    sessions: SessionCache,
    /// The server's own identity, used only to sign the proxy-mode
    /// `AuthenticateServer` message (step 5). `None` disables proxy mode.
    server_identity: Option<(String, Arc<dyn Factotum>)>,
}

impl AuthServer {
    pub fn new(keys: Arc<dyn PublicKeyLookup>, time: Arc<dyn TimeSource>) -> Self {
        AuthServer {
            keys,
            time,
            sessions: SessionCache::with_capacity(
                NonZeroUsize::new(DEFAULT_SESSION_CAPACITY).unwrap(),
            ),
            server_identity: None,
        }
    }

    pub fn with_server_identity(mut self, server_name: String, factotum: Arc<dyn Factotum>) -> Self {
        self.server_identity = Some((server_name, factotum));
        self
    }

    /// Runs the five-step handshake from spec §4.7.
    #[tracing::instrument(skip_all, err, fields(user = %request.user))]
    pub async fn handshake(&self, request: HandshakeRequest) -> Result<HandshakeResponse, Error> {
        let now = self.time.now();

        let skew = check_skew(request.timestamp, now)
            .map_err(|e| Error::permission(e.to_string()))?;
        if skew > WARN_SKEW_SECS {
            tracing::warn!(user = %request.user, skew, "handshake timestamp skew beyond warn threshold");
        }

        let public_keys = self.keys.public_keys(&request.user).await?;
        let message = client_auth_message(&request.user, request.timestamp);
        if !verify(&public_keys.signing, &message, &request.signature) {
            return Err(Error::permission("handshake signature did not verify"));
        }

        let token = generate_token();
        self.sessions
            .issue(
                token.clone(),
                Session {
                    user: request.user.clone(),
                    expiration: now + TOKEN_LIFETIME_SECS,
                    endpoint: request.endpoint,
                },
            )
            .await;

        let server_signature = if request.proxy_mode {
            let (server_name, factotum) = self
                .server_identity
                .as_ref()
                .ok_or_else(|| Error::invalid("proxy mode requested but no server identity configured"))?;
            let message = server_auth_message(server_name, now);
            Some(ServerSignature {
                signature: factotum.sign(&message),
                time: now,
            })
        } else {
            None
        };

        Ok(HandshakeResponse {
            token,
            server_signature,
        })
    }

    /// Validates a bearer token carried on a subsequent request.
    pub async fn authenticate(&self, token: &str) -> Result<UserName, Error> {
        self.sessions.authenticate(token, self.time.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keylookup::PublicKeyLookup;
    use crate::time::FixedTimeSource;
    use async_trait::async_trait;
    use upspin_pack::{InMemoryFactotum, PublicKeys};
    use upspin_types::Endpoint;

    struct FixedKeyLookup(PublicKeys);

    #[async_trait]
    impl PublicKeyLookup for FixedKeyLookup {
        async fn public_keys(&self, _user: &UserName) -> Result<PublicKeys, Error> {
            Ok(self.0.clone())
        }
    }

    fn ann() -> UserName {
        UserName::parse("ann@example.com").unwrap()
    }

    fn request_for(factotum: &InMemoryFactotum, timestamp: u64, proxy_mode: bool) -> HandshakeRequest {
        let message = client_auth_message(&ann(), timestamp);
        HandshakeRequest {
            user: ann(),
            timestamp,
            signature: factotum.sign(&message),
            endpoint: Endpoint::unassigned(),
            proxy_mode,
        }
    }

    #[tokio::test]
    async fn handshake_issues_a_usable_token() {
        let factotum = InMemoryFactotum::generate();
        let keys = Arc::new(FixedKeyLookup(factotum.public_keys()));
        let time = Arc::new(FixedTimeSource::new(1_000));
        let server = AuthServer::new(keys, time);

        let response = server
            .handshake(request_for(&factotum, 1_000, false))
            .await
            .unwrap();
        assert!(response.server_signature.is_none());

        let user = server.authenticate(&response.token).await.unwrap();
        assert_eq!(user, ann());
    }

    #[tokio::test]
    async fn handshake_rejects_excessive_skew() {
        let factotum = InMemoryFactotum::generate();
        let keys = Arc::new(FixedKeyLookup(factotum.public_keys()));
        let time = Arc::new(FixedTimeSource::new(1_000));
        let server = AuthServer::new(keys, time);

        let err = server
            .handshake(request_for(&factotum, 900, false))
            .await
            .unwrap_err();
        assert_eq!(err.kind, upspin_types::Kind::Permission);
    }

    #[tokio::test]
    async fn handshake_rejects_a_bad_signature() {
        let factotum = InMemoryFactotum::generate();
        let impostor = InMemoryFactotum::generate();
        let keys = Arc::new(FixedKeyLookup(factotum.public_keys()));
        let time = Arc::new(FixedTimeSource::new(1_000));
        let server = AuthServer::new(keys, time);

        let err = server
            .handshake(request_for(&impostor, 1_000, false))
            .await
            .unwrap_err();
        assert_eq!(err.kind, upspin_types::Kind::Permission);
    }

    #[tokio::test]
    async fn proxy_mode_without_server_identity_is_rejected() {
        let factotum = InMemoryFactotum::generate();
        let keys = Arc::new(FixedKeyLookup(factotum.public_keys()));
        let time = Arc::new(FixedTimeSource::new(1_000));
        let server = AuthServer::new(keys, time);

        let err = server
            .handshake(request_for(&factotum, 1_000, true))
            .await
            .unwrap_err();
        assert_eq!(err.kind, upspin_types::Kind::Invalid);
    }

    #[tokio::test]
    async fn proxy_mode_returns_a_server_signature() {
        let factotum = InMemoryFactotum::generate();
        let server_factotum = Arc::new(InMemoryFactotum::generate());
        let keys = Arc::new(FixedKeyLookup(factotum.public_keys()));
        let time = Arc::new(FixedTimeSource::new(1_000));
        let server = AuthServer::new(keys, time)
            .with_server_identity("dir.example.com".to_string(), server_factotum.clone());

        let response = server
            .handshake(request_for(&factotum, 1_000, true))
            .await
            .unwrap();
        let server_sig = response.server_signature.unwrap();

        let message = server_auth_message("dir.example.com", 1_000);
        assert!(verify(
            &server_factotum.public_keys().signing,
            &message,
            &server_sig.signature
        ));
    }
}
