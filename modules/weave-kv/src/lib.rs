//! A thin shared-KV abstraction over Redis, used by `weave-ratelimit`
//! (sliding-window counters) and `weave-tokens` (cached access tokens and
//! per-connection refresh locks). Nothing here is sync-engine specific —
//! it is the same "one Redis connection manager behind a trait object"
//! shape as the rest of the pack uses for shared infrastructure clients.

mod memory;
mod redis_kv;

pub use memory::InMemoryKv;
pub use redis_kv::RedisKv;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("kv backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, KvError>;

/// Backend-agnostic operations the rate limiter and token cache need.
/// Implementations must be safe to share across tasks (`Send + Sync`).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically increments `key` by 1, setting `ttl_secs` only on the
    /// first increment (key creation). Returns the post-increment value.
    /// This is the primitive the sliding-window rate limiter is built on.
    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Sets `key` to `value` only if it does not already exist, with a
    /// TTL. Used to implement the per-connection token-refresh lock: the
    /// first caller to succeed does the refresh, everyone else waits.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Sliding-window rate check: drops entries older than `window_secs`,
    /// counts what remains, and — if under `limit` — records `now_millis`
    /// as a new entry in the window. Returns `(allowed, retry_after_secs)`;
    /// `retry_after_secs` is only meaningful when `allowed` is false.
    ///
    /// Backed by a Redis sorted set (`ZREMRANGEBYSCORE` + `ZCOUNT` +
    /// `ZADD`) so the count is exact over the true sliding window, not a
    /// fixed-bucket approximation.
    async fn sliding_window_check(
        &self,
        key: &str,
        now_millis: i64,
        window_secs: u64,
        limit: u32,
    ) -> Result<(bool, f64)>;
}
