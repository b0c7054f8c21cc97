//! Redis cache backend.
//!
//! Writes go through `MULTI`/`EXEC` pipelines so a list replace can never be
//! observed half-applied.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tracing::info;

use super::CacheBackend;
use crate::{Error, Result};

fn cache_err(op: &str, err: redis::RedisError) -> Error {
    Error::cache(format!("redis {} failed: {}", op, err))
}

/// Redis-backed list cache.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to `url` (e.g. `redis://redis-service:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::config(format!("invalid redis url {}: {}", url, e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| cache_err("connect", e))?;
        info!(url = %url, "Connected to redis cache");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn push_front(
        &self,
        key: &str,
        value: String,
        max_len: usize,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let stop = max_len.saturating_sub(1) as isize;
        let _: () = redis::pipe()
            .atomic()
            .lpush(key, value)
            .ignore()
            .ltrim(key, 0, stop)
            .ignore()
            .expire(key, ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_err("push_front", e))?;
        Ok(())
    }

    async fn range(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>> {
        if start > stop {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let stop = isize::try_from(stop).unwrap_or(-1);
        conn.lrange(key, start as isize, stop)
            .await
            .map_err(|e| cache_err("range", e))
    }

    async fn replace(&self, key: &str, values: Vec<String>, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !values.is_empty() {
            pipe.rpush(key, values)
                .ignore()
                .expire(key, ttl.as_secs() as i64)
                .ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_err("replace", e))?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let secs: i64 = conn.ttl(key).await.map_err(|e| cache_err("ttl", e))?;
        // -2: missing key, -1: no expiry set.
        Ok(match secs {
            -2 => None,
            s if s < 0 => Some(Duration::MAX),
            s => Some(Duration::from_secs(s as u64)),
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_err("ping", e))?;
        Ok(())
    }
}
