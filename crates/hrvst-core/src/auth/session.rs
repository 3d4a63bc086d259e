use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::TokenEndpoint;
use crate::credentials::{normalize_client, normalize_email, CredentialStore, StoreError, PAT_CLIENT};
use crate::error::AuthError;

/// Access tokens this close to expiry are refreshed before use
const REFRESH_MARGIN_SECS: i64 = 30;

/// Synthetic lifetime of a personal access token
const PAT_LIFETIME_DAYS: i64 = 3650;

/// A short-lived access token held in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAccess {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Account the stored credential belongs to
    pub account_id: i64,
}

impl CachedAccess {
    /// Access for a token that never expires.
    pub fn non_expiring(access_token: &str, account_id: i64) -> Self {
        Self {
            access_token: access_token.to_string(),
            expires_at: Utc::now() + Duration::days(PAT_LIFETIME_DAYS),
            account_id,
        }
    }

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_empty() || self.expires_at - now <= Duration::seconds(REFRESH_MARGIN_SECS)
    }

    /// Check if the token will expire soon and should be refreshed
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    /// Seconds remaining until expiry (for display)
    pub fn seconds_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Lazily refreshed access token for one (client, email) credential.
///
/// One lock guards the cached token and is held across the whole refresh,
/// network call included, so concurrent readers wait for a single refresh
/// instead of racing the token endpoint.
pub struct AccessTokenCache {
    store: Arc<CredentialStore>,
    tokens: Arc<dyn TokenEndpoint>,
    client: String,
    email: String,
    state: Mutex<Option<CachedAccess>>,
}

impl AccessTokenCache {
    pub fn new(
        store: Arc<CredentialStore>,
        tokens: Arc<dyn TokenEndpoint>,
        client: &str,
        email: &str,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            store,
            tokens,
            client: normalize_client(client)?,
            email: normalize_email(email),
            state: Mutex::new(None),
        })
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// A usable access token, refreshing it first if needed.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.current().await?.access_token)
    }

    /// The cached access, refreshed if absent or about to expire.
    pub async fn current(&self) -> Result<CachedAccess, AuthError> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.as_ref() {
            if !cached.needs_refresh() {
                return Ok(cached.clone());
            }
        }

        let fresh = self.refresh(state.as_ref()).await?;
        *state = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drop the cached token so the next read refreshes.
    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
        debug!(client = %self.client, email = %self.email, "Access token invalidated");
    }

    async fn refresh(&self, previous: Option<&CachedAccess>) -> Result<CachedAccess, AuthError> {
        let record = self.store.get(&self.client, &self.email)?;
        if record.refresh_token.trim().is_empty() {
            return Err(StoreError::NotAuthenticated {
                client: record.client,
                email: record.email,
            }
            .into());
        }

        if self.client == PAT_CLIENT {
            return Ok(CachedAccess::non_expiring(&record.refresh_token, record.account_id));
        }

        debug!(
            client = %self.client,
            email = %self.email,
            had_token = previous.is_some(),
            "Refreshing access token"
        );
        let tokens = self
            .tokens
            .refresh(&record.refresh_token)
            .await
            .map_err(AuthError::ExchangeFailed)?;

        if let Some(rotated) = tokens.refresh_token() {
            if rotated != record.refresh_token {
                match self.store.replace_refresh_token(&record, rotated) {
                    Ok(_) => debug!("Stored rotated refresh token"),
                    Err(e) => warn!(error = %e, "Failed to store rotated refresh token"),
                }
            }
        }

        Ok(CachedAccess {
            expires_at: tokens.expires_at(Utc::now()),
            access_token: tokens.access_token,
            account_id: record.account_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::credentials::{MemoryBackend, SecretBackend};
    use crate::models::TokenSet;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Token endpoint that counts refreshes and hands out numbered tokens.
    struct CountingTokens {
        calls: AtomicUsize,
        expires_in: Option<i64>,
        rotate: bool,
        fail: bool,
    }

    impl CountingTokens {
        fn new(expires_in: Option<i64>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                expires_in,
                rotate: false,
                fail: false,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenEndpoint for CountingTokens {
        async fn exchange_code(&self, _code: &str, _redirect_uri: &str) -> Result<TokenSet, ApiError> {
            unreachable!("the cache never exchanges codes")
        }

        async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if self.fail {
                return Err(ApiError::Unauthorized);
            }
            Ok(TokenSet {
                access_token: format!("at-{}-{}", refresh_token, n),
                refresh_token: self.rotate.then(|| format!("rt-{}", n)),
                token_type: Some("bearer".to_string()),
                expires_in: self.expires_in,
                scope: None,
            })
        }
    }

    /// Memory backend whose writes can be switched off after seeding.
    struct ReadOnlyAfterSeed {
        inner: MemoryBackend,
        read_only: Arc<AtomicBool>,
    }

    impl SecretBackend for ReadOnlyAfterSeed {
        fn name(&self) -> &'static str {
            "read-only"
        }
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if self.read_only.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("read only".to_string()));
            }
            self.inner.set(key, value)
        }
        fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key)
        }
        fn list_keys(&self) -> Result<Vec<String>, StoreError> {
            self.inner.list_keys()
        }
    }

    fn seeded_store(client: &str) -> Arc<CredentialStore> {
        let store = CredentialStore::in_memory();
        store
            .set(client, "me@example.com", 77, "rt-0", &["harvest:all".to_string()])
            .unwrap();
        Arc::new(store)
    }

    // --- CachedAccess ---

    #[test]
    fn test_needs_refresh_margin() {
        let now = Utc::now();
        let access = |secs| CachedAccess {
            access_token: "at".to_string(),
            expires_at: now + Duration::seconds(secs),
            account_id: 1,
        };
        assert!(!access(31).needs_refresh_at(now));
        assert!(access(30).needs_refresh_at(now));
        assert!(access(-5).needs_refresh_at(now));

        let mut empty = access(3600);
        empty.access_token.clear();
        assert!(empty.needs_refresh_at(now));
    }

    #[test]
    fn test_non_expiring_never_needs_refresh() {
        let access = CachedAccess::non_expiring("pat", 3);
        assert!(!access.needs_refresh());
        assert!(access.seconds_until_expiry() > 86_400 * 365);
    }

    // --- Cache ---

    #[tokio::test]
    async fn test_fresh_token_served_from_memory() {
        let tokens = CountingTokens::new(Some(3600));
        let cache = AccessTokenCache::new(seeded_store("default"), tokens.clone(), "", "ME@example.com").unwrap();

        let first = cache.access_token().await.unwrap();
        let second = cache.access_token().await.unwrap();
        assert_eq!(first, "at-rt-0-1");
        assert_eq!(first, second);
        assert_eq!(tokens.calls(), 1);
        assert_eq!(cache.current().await.unwrap().account_id, 77);
    }

    #[tokio::test]
    async fn test_near_expiry_token_is_refreshed() {
        let tokens = CountingTokens::new(Some(20));
        let cache = AccessTokenCache::new(seeded_store("default"), tokens.clone(), "default", "me@example.com").unwrap();

        cache.access_token().await.unwrap();
        let second = cache.access_token().await.unwrap();
        assert_eq!(second, "at-rt-0-2");
        assert_eq!(tokens.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_expiry_refreshes_every_read() {
        let tokens = CountingTokens::new(None);
        let cache = AccessTokenCache::new(seeded_store("default"), tokens.clone(), "default", "me@example.com").unwrap();

        cache.access_token().await.unwrap();
        cache.access_token().await.unwrap();
        assert_eq!(tokens.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let tokens = CountingTokens::new(Some(3600));
        let cache = AccessTokenCache::new(seeded_store("default"), tokens.clone(), "default", "me@example.com").unwrap();

        cache.access_token().await.unwrap();
        cache.invalidate().await;
        cache.access_token().await.unwrap();
        assert_eq!(tokens.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_refresh() {
        let tokens = CountingTokens::new(Some(3600));
        let cache = AccessTokenCache::new(seeded_store("default"), tokens.clone(), "default", "me@example.com").unwrap();

        let (a, b) = tokio::join!(cache.access_token(), cache.access_token());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(tokens.calls(), 1);
    }

    #[tokio::test]
    async fn test_not_logged_in() {
        let tokens = CountingTokens::new(Some(3600));
        let cache = AccessTokenCache::new(seeded_store("default"), tokens.clone(), "default", "other@example.com").unwrap();

        let err = cache.access_token().await.unwrap_err();
        assert!(err.is_not_authenticated());
        assert_eq!(tokens.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_stored_refresh_token_is_not_authenticated() {
        let backend = MemoryBackend::new();
        backend
            .set("token:default:me@example.com", r#"{"refresh_token":"","account_id":5}"#)
            .unwrap();
        let store = Arc::new(CredentialStore::new(Box::new(backend)));
        let tokens = CountingTokens::new(Some(3600));
        let cache = AccessTokenCache::new(store, tokens.clone(), "default", "me@example.com").unwrap();

        let err = cache.access_token().await.unwrap_err();
        assert!(err.is_not_authenticated());
        assert_eq!(tokens.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_cache_empty() {
        let tokens = Arc::new(CountingTokens {
            calls: AtomicUsize::new(0),
            expires_in: Some(3600),
            rotate: false,
            fail: true,
        });
        let cache = AccessTokenCache::new(seeded_store("default"), tokens.clone(), "default", "me@example.com").unwrap();

        let err = cache.access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::ExchangeFailed(ApiError::Unauthorized)));
        assert!(cache.access_token().await.is_err());
        assert_eq!(tokens.calls(), 2);
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_written_back() {
        let store = seeded_store("default");
        let tokens = Arc::new(CountingTokens {
            calls: AtomicUsize::new(0),
            expires_in: Some(3600),
            rotate: true,
            fail: false,
        });
        let cache = AccessTokenCache::new(store.clone(), tokens, "default", "me@example.com").unwrap();

        let original = store.get("default", "me@example.com").unwrap();
        cache.access_token().await.unwrap();
        let record = store.get("default", "me@example.com").unwrap();
        assert_eq!(record.refresh_token, "rt-1");
        assert_eq!(record.created_at, original.created_at);
        assert_eq!(record.account_id, 77);
        assert_eq!(record.scopes, vec!["harvest:all".to_string()]);
    }

    #[tokio::test]
    async fn test_write_back_failure_is_not_fatal() {
        let read_only = Arc::new(AtomicBool::new(false));
        let store = CredentialStore::new(Box::new(ReadOnlyAfterSeed {
            inner: MemoryBackend::new(),
            read_only: read_only.clone(),
        }));
        store.set("default", "me@example.com", 77, "rt-0", &[]).unwrap();
        read_only.store(true, Ordering::SeqCst);

        let tokens = Arc::new(CountingTokens {
            calls: AtomicUsize::new(0),
            expires_in: Some(3600),
            rotate: true,
            fail: false,
        });
        let store = Arc::new(store);
        let cache = AccessTokenCache::new(store.clone(), tokens, "default", "me@example.com").unwrap();

        assert_eq!(cache.access_token().await.unwrap(), "at-rt-0-1");
        assert_eq!(store.get("default", "me@example.com").unwrap().refresh_token, "rt-0");
    }

    #[tokio::test]
    async fn test_pat_client_skips_token_endpoint() {
        let tokens = CountingTokens::new(Some(3600));
        let cache = AccessTokenCache::new(seeded_store(PAT_CLIENT), tokens.clone(), PAT_CLIENT, "me@example.com").unwrap();

        let access = cache.current().await.unwrap();
        assert_eq!(access.access_token, "rt-0");
        assert_eq!(access.account_id, 77);
        assert!(!access.needs_refresh());
        assert_eq!(tokens.calls(), 0);
    }
}
