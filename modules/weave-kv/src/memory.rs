use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{KvStore, Result};

struct Entry {
    value: String,
    expires_at: Instant,
}

struct Window {
    timestamps_millis: Vec<i64>,
}

/// In-memory stand-in for Redis, used by unit tests in `weave-ratelimit`
/// and `weave-tokens` so they don't need a live Redis instance.
#[derive(Default)]
pub struct InMemoryKv {
    entries: DashMap<String, Entry>,
    windows: DashMap<String, Window>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<String> {
        match self.entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn incr_with_ttl(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let still_live = self.live(key).is_some();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: Instant::now() + Duration::from_secs(ttl_secs),
        });
        if !still_live {
            entry.value = "0".to_string();
            entry.expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        }
        let next: i64 = entry.value.parse().unwrap_or(0) + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        if self.live(key).is_some() {
            return Ok(false);
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn sliding_window_check(
        &self,
        key: &str,
        now_millis: i64,
        window_secs: u64,
        limit: u32,
    ) -> Result<(bool, f64)> {
        let window_start = now_millis - (window_secs as i64 * 1000);
        let mut window = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            timestamps_millis: Vec::new(),
        });
        window.timestamps_millis.retain(|&t| t > window_start);

        if window.timestamps_millis.len() as u32 >= limit {
            let oldest = *window.timestamps_millis.iter().min().unwrap();
            let retry_after =
                ((oldest + window_secs as i64 * 1000 - now_millis) as f64 / 1000.0).max(0.1);
            return Ok((false, retry_after));
        }

        window.timestamps_millis.push(now_millis);
        Ok((true, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_with_ttl_counts_up() {
        let kv = InMemoryKv::new();
        assert_eq!(kv.incr_with_ttl("k", 60).await.unwrap(), 1);
        assert_eq!(kv.incr_with_ttl("k", 60).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sliding_window_blocks_once_limit_reached() {
        let kv = InMemoryKv::new();
        let (allowed1, _) = kv.sliding_window_check("w", 1_000, 60, 2).await.unwrap();
        let (allowed2, _) = kv.sliding_window_check("w", 1_500, 60, 2).await.unwrap();
        let (allowed3, retry_after) = kv.sliding_window_check("w", 2_000, 60, 2).await.unwrap();
        assert!(allowed1 && allowed2);
        assert!(!allowed3);
        assert!(retry_after > 0.0);
    }

    #[tokio::test]
    async fn sliding_window_forgets_entries_outside_window() {
        let kv = InMemoryKv::new();
        kv.sliding_window_check("w", 0, 10, 1).await.unwrap();
        let (allowed, _) = kv.sliding_window_check("w", 11_000, 10, 1).await.unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn set_nx_ex_only_succeeds_once() {
        let kv = InMemoryKv::new();
        assert!(kv.set_nx_ex("lock", "holder-a", 60).await.unwrap());
        assert!(!kv.set_nx_ex("lock", "holder-b", 60).await.unwrap());
        kv.del("lock").await.unwrap();
        assert!(kv.set_nx_ex("lock", "holder-b", 60).await.unwrap());
    }
}
