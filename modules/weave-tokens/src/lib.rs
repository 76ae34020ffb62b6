//! OAuth access-token refresh with per-connection coalescing.
//!
//! Every source driver needs a valid bearer token before it calls its
//! API. Refreshing is cheap once but expensive under concurrency: if a
//! sync job has a dozen concurrent page-fetch tasks and the token just
//! expired, naively refreshing once per task burns through the app's
//! refresh-token rotation budget and can race the provider into
//! invalidating the token. `TokenManager` fixes that by caching the live
//! access token in `weave-kv` and making only the first caller past an
//! expired token do the network round trip — everyone else polls the
//! cache until it shows up, bounded by `WeaveError::TokenRefreshError` on
//! timeout.

mod provider;

pub use provider::{OAuthProvider, RefreshedToken};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use weave_kv::KvStore;
use weave_types::{ConnectionId, WeaveError};

/// Persists a rotated refresh token back to the system of record (spec
/// §4.3: "rotating providers replace it atomically"). `weave-tokens`
/// only holds the *access* token cache — the refresh token itself lives
/// in the connection's encrypted-credentials row, which is outside this
/// crate's boundary (same narrow-trait shape as
/// `weave_orchestrator::repository::SyncRepository`). Providers that
/// never rotate (`OAuthSemantics::NoRefresh` / `WithRefresh`) never
/// trigger a call to this trait.
#[async_trait]
pub trait RefreshTokenSink: Send + Sync {
    async fn persist_rotated_refresh_token(&self, connection_id: ConnectionId, new_refresh_token: &str) -> anyhow::Result<()>;
}

const TOKEN_CACHE_TTL_SECS: u64 = 55 * 60; // refresh 5 min before a typical 1h expiry
const LOCK_TTL_SECS: u64 = 30;
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const POLL_TIMEOUT: Duration = Duration::from_secs(20);

pub struct TokenManager {
    kv: Arc<dyn KvStore>,
    provider: Arc<dyn OAuthProvider>,
    refresh_token_sink: Option<Arc<dyn RefreshTokenSink>>,
}

impl TokenManager {
    pub fn new(kv: Arc<dyn KvStore>, provider: Arc<dyn OAuthProvider>) -> Self {
        Self {
            kv,
            provider,
            refresh_token_sink: None,
        }
    }

    /// Attaches a sink that persists rotated refresh tokens. Only
    /// meaningful for providers built with
    /// `StandardOAuthProvider::rotating` (or any `OAuthProvider` that can
    /// return `new_refresh_token`) — non-rotating providers never
    /// populate that field, so the sink is simply never called for them.
    pub fn with_refresh_token_sink(mut self, sink: Arc<dyn RefreshTokenSink>) -> Self {
        self.refresh_token_sink = Some(sink);
        self
    }

    fn token_key(connection_id: ConnectionId) -> String {
        format!("oauth_token:{connection_id}")
    }

    fn lock_key(connection_id: ConnectionId) -> String {
        format!("oauth_refresh_lock:{connection_id}")
    }

    /// Returns a live access token for `connection_id`, refreshing it if
    /// the cache is cold and coalescing concurrent refreshes onto a
    /// single network call.
    pub async fn get_token(&self, connection_id: ConnectionId, refresh_token: &str) -> Result<String, WeaveError> {
        if let Some(cached) = self
            .kv
            .get(&Self::token_key(connection_id))
            .await
            .map_err(|e| WeaveError::Other(e.into()))?
        {
            return Ok(cached);
        }

        let lock_key = Self::lock_key(connection_id);
        let acquired = self
            .kv
            .set_nx_ex(&lock_key, "1", LOCK_TTL_SECS)
            .await
            .map_err(|e| WeaveError::Other(e.into()))?;

        if acquired {
            debug!(%connection_id, "refreshing oauth token");
            let refreshed = self.provider.refresh(refresh_token).await.map_err(|e| {
                WeaveError::TokenRefreshError {
                    connection_id: connection_id.to_string(),
                    reason: e.to_string(),
                }
            });
            let _ = self.kv.del(&lock_key).await;
            let refreshed = refreshed?;
            self.kv
                .set_ex(
                    &Self::token_key(connection_id),
                    &refreshed.access_token,
                    refreshed.expires_in_secs.unwrap_or(TOKEN_CACHE_TTL_SECS as u64),
                )
                .await
                .map_err(|e| WeaveError::Other(e.into()))?;

            if let (Some(sink), Some(new_refresh_token)) = (&self.refresh_token_sink, &refreshed.new_refresh_token) {
                if let Err(e) = sink.persist_rotated_refresh_token(connection_id, new_refresh_token).await {
                    warn!(%connection_id, error = %e, "failed to persist rotated refresh token");
                }
            }

            return Ok(refreshed.access_token);
        }

        self.wait_for_refresh(connection_id).await
    }

    async fn wait_for_refresh(&self, connection_id: ConnectionId) -> Result<String, WeaveError> {
        let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
            if let Some(token) = self
                .kv
                .get(&Self::token_key(connection_id))
                .await
                .map_err(|e| WeaveError::Other(e.into()))?
            {
                return Ok(token);
            }
        }
        warn!(%connection_id, "timed out waiting for concurrent token refresh");
        Err(WeaveError::TokenRefreshError {
            connection_id: connection_id.to_string(),
            reason: "timed out waiting for a concurrent refresh to complete".to_string(),
        })
    }

    /// Forces the cached token to be dropped, e.g. after a 401 that the
    /// cache couldn't have predicted (token revoked out of band).
    pub async fn invalidate(&self, connection_id: ConnectionId) -> Result<(), WeaveError> {
        self.kv
            .del(&Self::token_key(connection_id))
            .await
            .map_err(|e| WeaveError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use weave_kv::InMemoryKv;

    struct CountingProvider {
        calls: AtomicU32,
        rotates: bool,
    }

    #[async_trait]
    impl OAuthProvider for CountingProvider {
        async fn refresh(&self, _refresh_token: &str) -> anyhow::Result<RefreshedToken> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RefreshedToken {
                access_token: "fresh-token".to_string(),
                expires_in_secs: Some(3600),
                new_refresh_token: self.rotates.then(|| format!("rotated-rt-{call}")),
            })
        }
    }

    #[tokio::test]
    async fn caches_token_after_first_refresh() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            rotates: false,
        });
        let manager = TokenManager::new(kv, provider.clone());
        let conn = ConnectionId::new();

        let t1 = manager.get_token(conn, "rt").await.unwrap();
        let t2 = manager.get_token(conn, "rt").await.unwrap();

        assert_eq!(t1, "fresh-token");
        assert_eq!(t2, "fresh-token");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_refresh() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            rotates: false,
        });
        let manager = TokenManager::new(kv, provider.clone());
        let conn = ConnectionId::new();

        manager.get_token(conn, "rt").await.unwrap();
        manager.invalidate(conn).await.unwrap();
        manager.get_token(conn, "rt").await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    struct RecordingSink {
        persisted: tokio::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RefreshTokenSink for RecordingSink {
        async fn persist_rotated_refresh_token(&self, _connection_id: ConnectionId, new_refresh_token: &str) -> anyhow::Result<()> {
            self.persisted.lock().await.push(new_refresh_token.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn rotating_provider_persists_new_refresh_token_via_sink() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            rotates: true,
        });
        let sink = Arc::new(RecordingSink {
            persisted: tokio::sync::Mutex::new(Vec::new()),
        });
        let manager = TokenManager::new(kv, provider).with_refresh_token_sink(sink.clone());
        let conn = ConnectionId::new();

        manager.get_token(conn, "rt").await.unwrap();

        assert_eq!(sink.persisted.lock().await.as_slice(), ["rotated-rt-0"]);
    }

    #[tokio::test]
    async fn non_rotating_provider_never_calls_the_sink() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let provider = Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
            rotates: false,
        });
        let sink = Arc::new(RecordingSink {
            persisted: tokio::sync::Mutex::new(Vec::new()),
        });
        let manager = TokenManager::new(kv, provider).with_refresh_token_sink(sink.clone());
        let conn = ConnectionId::new();

        manager.get_token(conn, "rt").await.unwrap();

        assert!(sink.persisted.lock().await.is_empty());
    }
}
