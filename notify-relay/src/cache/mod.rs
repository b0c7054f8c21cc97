//! Per-recipient cache collaborator.
//!
//! The store keeps one list per recipient, newest entry at the head. The
//! backend only needs list primitives with key expiry; the store owns
//! serialization and per-recipient mutation ordering.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// List cache with key expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name for logs.
    fn backend_type(&self) -> &'static str;

    /// Push `value` onto the head of the list, trim it to `max_len` entries
    /// and (re)set its expiry to `ttl`.
    async fn push_front(
        &self,
        key: &str,
        value: String,
        max_len: usize,
        ttl: Duration,
    ) -> Result<()>;

    /// Entries `start..=stop` counted from the head; missing keys are empty.
    async fn range(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>>;

    /// Atomically replace the whole list and (re)set its expiry.
    ///
    /// An empty `values` removes the key.
    async fn replace(&self, key: &str, values: Vec<String>, ttl: Duration) -> Result<()>;

    /// Remaining time to live, `None` when the key does not exist.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Cheap availability probe.
    async fn ping(&self) -> Result<()>;
}
