//! In-process cache backend.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::CacheBackend;
use crate::{Error, Result};

/// A cached list with its expiration time.
#[derive(Debug, Clone)]
struct CacheList {
    values: VecDeque<String>,
    expires_at: Instant,
}

impl CacheList {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Thread-safe list cache with TTL-based eviction.
///
/// Expired keys are evicted lazily on access. The availability switch and
/// artificial latency let callers exercise outage handling.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    lists: Arc<DashMap<String, CacheList>>,
    unavailable: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the cache going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.lists.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn check(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::cache("in-memory cache marked unavailable"));
        }
        Ok(())
    }

    fn expiry(ttl: Duration) -> Result<Instant> {
        Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| Error::validation(format!("cache ttl out of range: {:?}", ttl)))
    }

    fn live_entry(&self, key: &str) -> Option<dashmap::mapref::one::Ref<'_, String, CacheList>> {
        let entry = self.lists.get(key)?;
        if entry.is_expired() {
            drop(entry); // Release the lock before removing
            self.lists.remove_if(key, |_, list| list.is_expired());
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn push_front(
        &self,
        key: &str,
        value: String,
        max_len: usize,
        ttl: Duration,
    ) -> Result<()> {
        self.check().await?;

        let expires_at = Self::expiry(ttl)?;
        let mut entry = self.lists.entry(key.to_string()).or_insert_with(|| CacheList {
            values: VecDeque::new(),
            expires_at,
        });
        if entry.is_expired() {
            entry.values.clear();
        }
        entry.values.push_front(value);
        entry.values.truncate(max_len);
        entry.expires_at = expires_at;
        Ok(())
    }

    async fn range(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>> {
        self.check().await?;

        let Some(entry) = self.live_entry(key) else {
            return Ok(Vec::new());
        };
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(entry
            .values
            .iter()
            .skip(start)
            .take(stop.saturating_sub(start).saturating_add(1))
            .cloned()
            .collect())
    }

    async fn replace(&self, key: &str, values: Vec<String>, ttl: Duration) -> Result<()> {
        self.check().await?;

        if values.is_empty() {
            self.lists.remove(key);
            return Ok(());
        }
        let expires_at = Self::expiry(ttl)?;
        self.lists.insert(
            key.to_string(),
            CacheList {
                values: values.into(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.check().await?;

        Ok(self
            .live_entry(key)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn ping(&self) -> Result<()> {
        self.check().await
    }
}
