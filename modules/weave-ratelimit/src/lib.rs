//! Distributed source rate limiting, grounded on the
//! original's `SourceRateLimiter`: a Redis sorted-set sliding window keyed
//! either per-source (one shared budget across every connection using
//! that app) or per-connection (each authorized account has its own
//! budget), with the per-source/per-connection choice coming from
//! `RateLimitScope`.
//!
//! The counting primitive itself lives in `weave-kv::sliding_window_check`
//! so this crate only owns key construction and the public check/record
//! API; horizontal scale-out works because every worker instance shares
//! the same KV backend.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use weave_kv::KvStore;
use weave_types::sync::{RateLimitConfig, RateLimitScope};
use weave_types::WeaveError;

const KEY_PREFIX: &str = "source_rate_limit";

/// Shared-infrastructure limit on Airweave's own OAuth proxy. Every connection that routes through the
/// proxy shares this one budget regardless of which underlying source
/// it's proxying for.
pub const PIPEDREAM_PROXY_SOURCE: &str = "pipedream_proxy";
pub const PIPEDREAM_PROXY_DEFAULT_LIMIT: u32 = 1000;
pub const PIPEDREAM_PROXY_DEFAULT_WINDOW_SECS: u32 = 300;

fn redis_key(scope: &RateLimitScope) -> String {
    match scope {
        RateLimitScope::Source { organization_id, source_short_name } => {
            format!("{KEY_PREFIX}:{organization_id}:source:{source_short_name}")
        }
        RateLimitScope::Connection { organization_id, connection_id } => {
            format!("{KEY_PREFIX}:{organization_id}:connection:{connection_id}")
        }
    }
}

fn source_short_name(scope: &RateLimitScope) -> String {
    match scope {
        RateLimitScope::Source { source_short_name, .. } => source_short_name.clone(),
        RateLimitScope::Connection { connection_id, .. } => connection_id.to_string(),
    }
}

/// Enforces a single `RateLimitConfig` against the shared KV store. One
/// instance per (org, source) pair that has a limit configured; sources
/// with no configured limit never construct one and calls simply aren't
/// gated.
pub struct SourceRateLimiter {
    kv: Arc<dyn KvStore>,
    config: RateLimitConfig,
}

impl SourceRateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, config: RateLimitConfig) -> Self {
        Self { kv, config }
    }

    /// Checks the limit and, if under budget, records this call in the
    /// window. Returns `WeaveError::SourceRateLimitExceeded` with the
    /// caller-facing retry-after duration when over budget.
    pub async fn check_and_record(&self) -> Result<(), WeaveError> {
        let key = redis_key(&self.config.scope);
        let now_millis = Utc::now().timestamp_millis();
        let (allowed, retry_after_secs) = self
            .kv
            .sliding_window_check(
                &key,
                now_millis,
                self.config.window_secs as u64,
                self.config.max_requests,
            )
            .await
            .map_err(|e| WeaveError::Other(e.into()))?;

        if !allowed {
            let source = source_short_name(&self.config.scope);
            warn!(source = %source, retry_after_secs, "source rate limit exceeded");
            return Err(WeaveError::SourceRateLimitExceeded {
                source_short_name: source,
                retry_after_secs: retry_after_secs.ceil() as u64,
            });
        }
        Ok(())
    }
}

/// Outbound-request limiter for Airweave's own HTTP consumers. Keyed `rl:{org}:{scope}` rather than
/// `src:{org}:{source}:...`, so an org's search-API budget and its
/// per-source crawl budgets never collide in the same KV namespace.
pub struct OrgRateLimiter {
    kv: Arc<dyn KvStore>,
    org_id: String,
    scope: String,
    max_requests: u32,
    window_secs: u32,
}

impl OrgRateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, org_id: impl Into<String>, scope: impl Into<String>, max_requests: u32, window_secs: u32) -> Self {
        Self {
            kv,
            org_id: org_id.into(),
            scope: scope.into(),
            max_requests,
            window_secs,
        }
    }

    pub async fn check_and_record(&self) -> Result<(), WeaveError> {
        let key = format!("rl:{}:{}", self.org_id, self.scope);
        let now_millis = Utc::now().timestamp_millis();
        let (allowed, retry_after_secs) = self
            .kv
            .sliding_window_check(&key, now_millis, self.window_secs as u64, self.max_requests)
            .await
            .map_err(|e| WeaveError::Other(e.into()))?;

        if !allowed {
            return Err(WeaveError::RateLimitExceeded {
                retry_after_secs: retry_after_secs.ceil() as u64,
            });
        }
        Ok(())
    }
}

/// Wraps a source's own `SourceRateLimiter` with the shared
/// `pipedream_proxy` budget, for connections that are routed through the
/// OAuth proxy rather than calling the source directly. Both checks must
/// pass; either one failing surfaces `SourceRateLimitExceeded` with that
/// limiter's own retry-after.
pub struct ProxiedSourceRateLimiter {
    source: SourceRateLimiter,
    proxy: SourceRateLimiter,
}

impl ProxiedSourceRateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, source_config: RateLimitConfig) -> Self {
        let organization_id = match &source_config.scope {
            RateLimitScope::Source { organization_id, .. } => *organization_id,
            RateLimitScope::Connection { organization_id, .. } => *organization_id,
        };
        let proxy_config = RateLimitConfig {
            scope: RateLimitScope::Source {
                organization_id,
                source_short_name: PIPEDREAM_PROXY_SOURCE.to_string(),
            },
            max_requests: PIPEDREAM_PROXY_DEFAULT_LIMIT,
            window_secs: PIPEDREAM_PROXY_DEFAULT_WINDOW_SECS,
        };
        Self {
            source: SourceRateLimiter::new(kv.clone(), source_config),
            proxy: SourceRateLimiter::new(kv, proxy_config),
        }
    }

    pub async fn check_and_record(&self) -> Result<(), WeaveError> {
        self.proxy.check_and_record().await?;
        self.source.check_and_record().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_kv::InMemoryKv;

    #[tokio::test]
    async fn blocks_after_limit_and_recovers_outside_window() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let limiter = SourceRateLimiter::new(
            kv,
            RateLimitConfig {
                scope: RateLimitScope::Source {
                    organization_id: weave_types::OrganizationId::new(),
                    source_short_name: "google_drive".to_string(),
                },
                max_requests: 2,
                window_secs: 60,
            },
        );

        limiter.check_and_record().await.unwrap();
        limiter.check_and_record().await.unwrap();
        let err = limiter.check_and_record().await.unwrap_err();
        matches!(err, WeaveError::SourceRateLimitExceeded { .. });
    }

    #[tokio::test]
    async fn connection_scope_and_source_scope_are_independent_buckets() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let org = weave_types::OrganizationId::new();
        let source = SourceRateLimiter::new(
            kv.clone(),
            RateLimitConfig {
                scope: RateLimitScope::Source {
                    organization_id: org,
                    source_short_name: "notion".to_string(),
                },
                max_requests: 1,
                window_secs: 60,
            },
        );
        let conn = SourceRateLimiter::new(
            kv,
            RateLimitConfig {
                scope: RateLimitScope::Connection {
                    organization_id: org,
                    connection_id: weave_types::ConnectionId::new(),
                },
                max_requests: 1,
                window_secs: 60,
            },
        );
        source.check_and_record().await.unwrap();
        conn.check_and_record().await.unwrap();
    }

    #[tokio::test]
    async fn two_orgs_on_the_same_source_get_independent_buckets() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let org_a = SourceRateLimiter::new(
            kv.clone(),
            RateLimitConfig {
                scope: RateLimitScope::Source {
                    organization_id: weave_types::OrganizationId::new(),
                    source_short_name: "asana".to_string(),
                },
                max_requests: 1,
                window_secs: 60,
            },
        );
        let org_b = SourceRateLimiter::new(
            kv,
            RateLimitConfig {
                scope: RateLimitScope::Source {
                    organization_id: weave_types::OrganizationId::new(),
                    source_short_name: "asana".to_string(),
                },
                max_requests: 1,
                window_secs: 60,
            },
        );
        org_a.check_and_record().await.unwrap();
        // Would fail if both orgs shared a bucket keyed only on source.
        org_b.check_and_record().await.unwrap();
    }

    #[tokio::test]
    async fn org_rate_limiter_blocks_independently_of_source_limiter() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let limiter = OrgRateLimiter::new(kv, "org-1", "search", 1, 60);

        limiter.check_and_record().await.unwrap();
        let err = limiter.check_and_record().await.unwrap_err();
        assert!(matches!(err, WeaveError::RateLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn proxied_limiter_trips_on_either_budget() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKv::new());
        let limiter = ProxiedSourceRateLimiter::new(
            kv,
            RateLimitConfig {
                scope: RateLimitScope::Connection {
                    organization_id: weave_types::OrganizationId::new(),
                    connection_id: weave_types::ConnectionId::new(),
                },
                max_requests: 1,
                window_secs: 60,
            },
        );

        limiter.check_and_record().await.unwrap();
        let err = limiter.check_and_record().await.unwrap_err();
        assert!(matches!(err, WeaveError::SourceRateLimitExceeded { .. }));
    }
}
