use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::RwLock;

use upspin_path::UserName;
use upspin_types::{Endpoint, Error};

use crate::time::TimeSource;

/// The auth handshake's lifetime for a session token: 20 hours, per spec
/// §4.7/§5.
pub const TOKEN_LIFETIME_SECS: u64 = 20 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Session {
    pub user: UserName,
    pub expiration: u64,
    pub endpoint: Endpoint,
}

/// The process-wide bearer-token cache every RPC server shares. Bounded
/// with LRU eviction, guarded by one `tokio::sync::RwLock` — grounded on
/// `store::pathinfoservice::LruPathInfoService`'s
/// `Arc<RwLock<LruCache<..>>>` shape.
pub struct SessionCache {
    cache: RwLock<LruCache<String, Session>>,
}

impl SessionCache {
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        SessionCache {
            cache: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub async fn issue(&self, token: String, session: Session) {
        self.cache.write().await.put(token, session);
    }

    /// Looks up `token`, validating it against `time`. Absent → a
    /// `Permission` error tagged "unauthenticated"; present but past
    /// `expiration` → removed from the cache and a `Permission` error
    /// tagged "expired". Both map to a transport-level permission
    /// failure per spec §4.7.
    pub async fn authenticate(
        &self,
        token: &str,
        time: &dyn TimeSource,
    ) -> Result<UserName, Error> {
        let mut cache = self.cache.write().await;
        let Some(session) = cache.get(token) else {
            return Err(Error::permission("unauthenticated: no such session"));
        };

        if time.now() >= session.expiration {
            cache.pop(token);
            return Err(Error::permission("expired: session token has expired"));
        }

        Ok(session.user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FixedTimeSource;

    fn sample_session(user: &str, expiration: u64) -> Session {
        Session {
            user: UserName::parse(user).unwrap(),
            expiration,
            endpoint: Endpoint::unassigned(),
        }
    }

    #[tokio::test]
    async fn unknown_token_is_unauthenticated() {
        let cache = SessionCache::with_capacity(NonZeroUsize::new(4).unwrap());
        let time = FixedTimeSource::new(1_000);
        let err = cache.authenticate("nope", &time).await.unwrap_err();
        assert_eq!(err.kind, upspin_types::Kind::Permission);
    }

    #[tokio::test]
    async fn expired_token_is_removed_and_rejected() {
        let cache = SessionCache::with_capacity(NonZeroUsize::new(4).unwrap());
        let time = FixedTimeSource::new(1_000);
        cache
            .issue("tok".to_string(), sample_session("ann@example.com", 999))
            .await;

        let err = cache.authenticate("tok", &time).await.unwrap_err();
        assert_eq!(err.kind, upspin_types::Kind::Permission);
        // removed: a second lookup still fails the same way, not a cache hit.
        let err = cache.authenticate("tok", &time).await.unwrap_err();
        assert_eq!(err.kind, upspin_types::Kind::Permission);
    }

    #[tokio::test]
    async fn valid_token_resolves_to_its_user() {
        let cache = SessionCache::with_capacity(NonZeroUsize::new(4).unwrap());
        let time = FixedTimeSource::new(1_000);
        cache
            .issue("tok".to_string(), sample_session("ann@example.com", 2_000))
            .await;

        let user = cache.authenticate("tok", &time).await.unwrap();
        assert_eq!(user.to_string(), "ann@example.com");
    }

    #[tokio::test]
    async fn eviction_is_lru() {
        let cache = SessionCache::with_capacity(NonZeroUsize::new(1).unwrap());
        let time = FixedTimeSource::new(1_000);
        cache
            .issue("first".to_string(), sample_session("ann@example.com", 2_000))
            .await;
        cache
            .issue("second".to_string(), sample_session("bob@example.com", 2_000))
            .await;

        assert!(cache.authenticate("first", &time).await.is_err());
        assert!(cache.authenticate("second", &time).await.is_ok());
    }
}
