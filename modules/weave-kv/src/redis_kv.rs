use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::{KvError, KvStore, Result};

/// `ConnectionManager` already reconnects and pipelines under the hood, so
/// this is a thin pass-through — the interesting logic (sliding window,
/// coalesced refresh) lives one layer up in `weave-ratelimit`/`weave-tokens`.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| KvError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let mut conn = self.conn.clone();
        // INCR then conditionally EXPIRE with NX so an existing window's
        // remaining TTL is never reset by a later increment.
        let value: i64 = conn
            .incr(key, 1)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        if value == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await
                .map_err(|e| KvError::Backend(e.to_string()))?;
        }
        Ok(value)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(ttl_secs as usize));
        let result: Option<String> = conn
            .set_options(key, value, opts)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        Ok(result.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(|e| KvError::Backend(e.to_string()))
    }

    async fn sliding_window_check(
        &self,
        key: &str,
        now_millis: i64,
        window_secs: u64,
        limit: u32,
    ) -> Result<(bool, f64)> {
        let mut conn = self.conn.clone();
        let now = now_millis as f64 / 1000.0;
        let window_start = now - window_secs as f64;

        let _: () = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(0)
            .arg(window_start)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;

        let count: i64 = redis::cmd("ZCOUNT")
            .arg(key)
            .arg(window_start)
            .arg(now)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;

        if count as u32 >= limit {
            let oldest: Vec<(String, f64)> = redis::cmd("ZRANGE")
                .arg(key)
                .arg(0)
                .arg(0)
                .arg("WITHSCORES")
                .query_async(&mut conn)
                .await
                .map_err(|e| KvError::Backend(e.to_string()))?;
            let retry_after = oldest
                .first()
                .map(|(_, score)| ((score + window_secs as f64) - now).max(0.1))
                .unwrap_or(window_secs as f64);
            return Ok((false, retry_after));
        }

        let _: () = redis::cmd("ZADD")
            .arg(key)
            .arg(now)
            .arg(now.to_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(window_secs * 2)
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Backend(e.to_string()))?;

        Ok((true, 0.0))
    }
}
