//! Notification store.
//!
//! Owns two views of the same notification set:
//! - an append-only in-process sequence holding every record, the source of
//!   truth for the lifetime of the process
//! - a per-recipient list in the cache collaborator (newest first, capped,
//!   expiring), holding only records with a recipient
//!
//! Cache writes for one recipient are serialized through a per-recipient
//! async lock, and the cached copy of a record is always serialized from the
//! sequence while that lock is held. Together with the atomic list replace of
//! the backend this keeps the `read` flag identical in both views.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::events::{NotificationDraft, NotificationRecord};
use super::stats::{NotificationStats, summarize};
use crate::cache::CacheBackend;
use crate::config::CacheSettings;
use crate::{Error, Result};

/// Where a per-recipient listing was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingSource {
    Cache,
    Fallback,
}

/// Notifications for one recipient, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientListing {
    pub notifications: Vec<NotificationRecord>,
    pub source: ListingSource,
}

/// The in-process sequence plus its id counter, guarded together.
#[derive(Debug)]
struct Sequence {
    records: Vec<NotificationRecord>,
    next_id: u64,
}

impl Sequence {
    /// Ids are assigned in insertion order, so the vector is sorted by id.
    fn position(&self, id: u64) -> Option<usize> {
        self.records.binary_search_by_key(&id, |r| r.id).ok()
    }

    fn get(&self, id: u64) -> Option<&NotificationRecord> {
        self.position(id).map(|idx| &self.records[idx])
    }
}

/// Dual-representation notification store.
pub struct NotificationStore {
    sequence: RwLock<Sequence>,
    cache: Arc<dyn CacheBackend>,
    settings: CacheSettings,
    recipient_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NotificationStore {
    pub fn new(cache: Arc<dyn CacheBackend>, settings: CacheSettings) -> Self {
        Self {
            sequence: RwLock::new(Sequence {
                records: Vec::new(),
                next_id: 1,
            }),
            cache,
            settings,
            recipient_locks: DashMap::new(),
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Persist a draft.
    ///
    /// The in-process insert always succeeds; a cache failure is logged and
    /// only degrades the per-recipient fast path.
    pub async fn append(&self, draft: NotificationDraft) -> NotificationRecord {
        let record = {
            let mut seq = self.sequence.write();
            let id = seq.next_id;
            seq.next_id += 1;
            let record = NotificationRecord::from_draft(id, draft);
            seq.records.push(record.clone());
            record
        };

        if let Some(recipient_id) = record.recipient_id.as_deref() {
            if let Err(e) = self.push_to_cache(recipient_id, record.id).await {
                warn!(
                    recipient = %recipient_id,
                    notification_id = record.id,
                    error = %e,
                    "Failed to cache notification, recipient view degraded"
                );
            }
        }

        debug!(
            notification_id = record.id,
            kind = %record.kind,
            title = %record.title,
            "Notification stored"
        );
        record
    }

    async fn push_to_cache(&self, recipient_id: &str, id: u64) -> Result<()> {
        self.with_recipient_lock(recipient_id, self.push_locked(recipient_id, id))
            .await
    }

    async fn push_locked(&self, recipient_id: &str, id: u64) -> Result<()> {
        // Serialize the current state, not the state at insert time: a
        // concurrent mark-read may already have flipped the flag.
        let payload = match self.sequence.read().get(id) {
            Some(record) => serde_json::to_string(record)?,
            None => return Err(Error::not_found("Notification", id.to_string())),
        };

        let key = self.settings.recipient_key(recipient_id);
        self.bounded(
            "cache.push_front",
            self.cache
                .push_front(&key, payload, self.settings.max_entries, self.settings.ttl()),
        )
        .await
    }

    /// The most recent `limit` records, oldest first.
    pub fn list_recent(&self, limit: usize) -> Vec<NotificationRecord> {
        let seq = self.sequence.read();
        let start = seq.records.len().saturating_sub(limit);
        seq.records[start..].to_vec()
    }

    /// Every record, oldest first.
    pub fn list_all(&self) -> Vec<NotificationRecord> {
        self.sequence.read().records.clone()
    }

    pub fn len(&self) -> usize {
        self.sequence.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: u64) -> Option<NotificationRecord> {
        self.sequence.read().get(id).cloned()
    }

    /// The most recent `limit` records for a recipient, oldest first.
    ///
    /// Served from the cache list when it is reachable and non-empty,
    /// otherwise from the in-process sequence.
    pub async fn list_for_recipient(&self, recipient_id: &str, limit: usize) -> RecipientListing {
        if limit == 0 {
            return RecipientListing {
                notifications: Vec::new(),
                source: ListingSource::Fallback,
            };
        }

        match self.read_cached(recipient_id, limit).await {
            Ok(records) if !records.is_empty() => {
                return RecipientListing {
                    notifications: records,
                    source: ListingSource::Cache,
                };
            }
            Ok(_) => {
                debug!(recipient = %recipient_id, "No cached notifications, using fallback");
            }
            Err(e) => {
                warn!(
                    recipient = %recipient_id,
                    error = %e,
                    "Cache read failed, using fallback"
                );
            }
        }

        RecipientListing {
            notifications: self.fallback_for_recipient(recipient_id, limit),
            source: ListingSource::Fallback,
        }
    }

    async fn read_cached(&self, recipient_id: &str, limit: usize) -> Result<Vec<NotificationRecord>> {
        let key = self.settings.recipient_key(recipient_id);
        let stop = limit.min(self.settings.max_entries).saturating_sub(1);
        let raw = self
            .bounded("cache.range", self.cache.range(&key, 0, stop))
            .await?;

        let mut records: Vec<NotificationRecord> = raw
            .iter()
            .filter_map(|value| match serde_json::from_str(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping undecodable cached notification");
                    None
                }
            })
            .collect();

        // Cached lists are newest first; listings are oldest first. Sort by
        // id rather than reversing: two appends for one recipient may reach
        // the cache in either order.
        records.sort_by_key(|r| r.id);

        // The sequence is authoritative for the read flag.
        let seq = self.sequence.read();
        for record in &mut records {
            if let Some(current) = seq.get(record.id) {
                record.read = current.read;
            }
        }
        Ok(records)
    }

    fn fallback_for_recipient(&self, recipient_id: &str, limit: usize) -> Vec<NotificationRecord> {
        let seq = self.sequence.read();
        let mut records: Vec<NotificationRecord> = seq
            .records
            .iter()
            .rev()
            .filter(|r| r.recipient_id.as_deref() == Some(recipient_id))
            .take(limit)
            .cloned()
            .collect();
        records.reverse();
        records
    }

    /// Mark a notification as read in both views.
    ///
    /// Idempotent: marking an already-read record succeeds without a second
    /// state change. Fails with `NotFound` for unknown ids and leaves both
    /// views untouched.
    pub async fn mark_read(&self, id: u64) -> Result<NotificationRecord> {
        let recipient_id = self
            .sequence
            .read()
            .get(id)
            .map(|r| r.recipient_id.clone())
            .ok_or_else(|| Error::not_found("Notification", id.to_string()))?;

        let Some(recipient_id) = recipient_id else {
            return self.flip_read(id);
        };

        self.with_recipient_lock(&recipient_id, self.mark_read_locked(&recipient_id, id))
            .await
    }

    async fn mark_read_locked(&self, recipient_id: &str, id: u64) -> Result<NotificationRecord> {
        let record = self.flip_read(id)?;
        if let Err(e) = self.rewrite_cached(recipient_id, id).await {
            // Listings overlay the flag from the sequence, so readers still
            // observe the update.
            warn!(
                recipient = %recipient_id,
                notification_id = id,
                error = %e,
                "Failed to update cached notification"
            );
        }
        Ok(record)
    }

    fn flip_read(&self, id: u64) -> Result<NotificationRecord> {
        let mut seq = self.sequence.write();
        let idx = seq
            .position(id)
            .ok_or_else(|| Error::not_found("Notification", id.to_string()))?;
        let record = &mut seq.records[idx];
        record.read = true;
        Ok(record.clone())
    }

    /// Read-modify-write of a recipient's cache list. Caller holds the
    /// recipient lock.
    async fn rewrite_cached(&self, recipient_id: &str, id: u64) -> Result<()> {
        let key = self.settings.recipient_key(recipient_id);
        let cached = self
            .bounded("cache.range", self.cache.range(&key, 0, usize::MAX))
            .await?;

        let mut changed = false;
        let mut updated = Vec::with_capacity(cached.len());
        for value in cached {
            match serde_json::from_str::<NotificationRecord>(&value) {
                Ok(mut record) if record.id == id && !record.read => {
                    record.read = true;
                    updated.push(serde_json::to_string(&record)?);
                    changed = true;
                }
                // Entries we cannot decode are carried over untouched.
                _ => updated.push(value),
            }
        }

        if !changed {
            return Ok(());
        }

        self.bounded(
            "cache.replace",
            self.cache.replace(&key, updated, self.settings.ttl()),
        )
        .await
    }

    /// Read/unread and per-kind counts from a fresh scan of the sequence.
    pub fn summarize(&self) -> NotificationStats {
        summarize(&self.sequence.read().records)
    }

    /// Run `fut` while holding the recipient's cache lock.
    ///
    /// The lock entry is dropped again once no other task holds or waits on
    /// it, so the map only tracks recipients with writes in flight.
    async fn with_recipient_lock<T>(
        &self,
        recipient_id: &str,
        fut: impl Future<Output = T>,
    ) -> T {
        let lock = self
            .recipient_locks
            .entry(recipient_id.to_string())
            .or_default()
            .clone();

        let output = {
            let _guard = lock.lock().await;
            fut.await
        };

        drop(lock);
        self.recipient_locks
            .remove_if(recipient_id, |_, lock| Arc::strong_count(lock) == 1);
        output
    }

    /// Bound a cache call by the configured timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let timeout = self.settings.operation_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::cache(format!(
                "{} timed out after {}ms",
                operation,
                timeout.as_millis()
            ))),
        }
    }
}
