//! Notification service.
//!
//! Transport-independent query surface over the store: listing, mark-read,
//! statistics, health, and the manual send path used by operators and tests.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::timeout;
use tracing::{info, warn};

use super::events::{EventEnvelope, NotificationDraft, NotificationKind, NotificationRecord};
use super::stats::NotificationStats;
use super::store::{NotificationStore, RecipientListing};
use crate::broker::EventPublisher;
use crate::config::{BrokerSettings, DEFAULT_RECENT_LIMIT, DEFAULT_RECIPIENT_LIMIT};
use crate::{Error, Result};

/// Event type published after a manual send.
pub const NOTIFICATION_SENT_EVENT: &str = "notification_sent";

const SERVICE_NAME: &str = "notification-service";

/// A manually submitted notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManualNotification {
    #[serde(default, rename = "userId", alias = "user_id")]
    pub recipient_id: Option<String>,
    pub title: String,
    pub message: String,
    /// Defaults to [`NotificationKind::Manual`].
    #[serde(default, rename = "type")]
    pub kind: Option<NotificationKind>,
}

/// Recent notifications plus the size of the whole sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentListing {
    pub notifications: Vec<NotificationRecord>,
    pub count: usize,
}

/// Liveness snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub cache_backend: String,
    pub cache_available: bool,
}

/// The notification service.
pub struct NotificationService {
    store: Arc<NotificationStore>,
    publisher: Option<Arc<dyn EventPublisher>>,
    broker_settings: BrokerSettings,
}

impl NotificationService {
    pub fn new(store: Arc<NotificationStore>, broker_settings: BrokerSettings) -> Self {
        Self {
            store,
            publisher: None,
            broker_settings,
        }
    }

    /// Publish a `notification_sent` event after every manual send.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    /// The most recent notifications, oldest first (default 50).
    pub fn list_recent(&self, limit: Option<usize>) -> RecentListing {
        RecentListing {
            notifications: self.store.list_recent(limit.unwrap_or(DEFAULT_RECENT_LIMIT)),
            count: self.store.len(),
        }
    }

    /// Notifications for one recipient, oldest first (default 20).
    pub async fn list_for_recipient(
        &self,
        recipient_id: &str,
        limit: Option<usize>,
    ) -> RecipientListing {
        self.store
            .list_for_recipient(recipient_id, limit.unwrap_or(DEFAULT_RECIPIENT_LIMIT))
            .await
    }

    pub async fn mark_read(&self, id: u64) -> Result<NotificationRecord> {
        let record = self.store.mark_read(id).await?;
        info!(notification_id = id, "Notification marked as read");
        Ok(record)
    }

    pub fn summarize(&self) -> NotificationStats {
        self.store.summarize()
    }

    /// Store a manually submitted notification.
    ///
    /// Title and message are required. The `notification_sent` event is
    /// published best-effort: a broker failure is logged, not returned.
    pub async fn send_manual(&self, request: ManualNotification) -> Result<NotificationRecord> {
        if request.title.trim().is_empty() || request.message.trim().is_empty() {
            return Err(Error::validation("Title and message are required"));
        }

        let draft = NotificationDraft {
            kind: request.kind.unwrap_or(NotificationKind::Manual),
            recipient_id: request.recipient_id.filter(|id| !id.is_empty()),
            title: request.title,
            message: request.message,
            occurred_at: Utc::now(),
        };
        let record = self.store.append(draft).await;
        info!(notification_id = record.id, "Manual notification sent");

        if let Err(e) = self.publish_sent(&record).await {
            warn!(
                notification_id = record.id,
                error = %e,
                "Error sending notification event to broker"
            );
        }

        Ok(record)
    }

    async fn publish_sent(&self, record: &NotificationRecord) -> Result<()> {
        let Some(publisher) = self.publisher.as_ref() else {
            return Ok(());
        };

        let envelope = EventEnvelope::new(
            NOTIFICATION_SENT_EVENT,
            Utc::now(),
            json!({ "notification": record }),
        );
        let payload = Bytes::from(envelope.encode()?);
        let op_timeout = self.broker_settings.operation_timeout();

        match timeout(
            op_timeout,
            publisher.publish(
                &self.broker_settings.topic,
                record.recipient_id.as_deref(),
                payload,
            ),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: "broker.publish",
                timeout_ms: op_timeout.as_millis() as u64,
            }),
        }
    }

    /// Probe the cache and report liveness.
    pub async fn health(&self) -> HealthStatus {
        let cache = self.store.cache();
        let op_timeout = self.store.settings().operation_timeout();
        let cache_available = matches!(timeout(op_timeout, cache.ping()).await, Ok(Ok(())));

        HealthStatus {
            status: if cache_available { "healthy" } else { "degraded" }.to_string(),
            service: SERVICE_NAME.to_string(),
            timestamp: Utc::now(),
            cache_backend: cache.backend_type().to_string(),
            cache_available,
        }
    }
}
