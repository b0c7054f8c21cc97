//! Notification events and records.
//!
//! Defines the raw event envelope received from the broker, the typed draft
//! produced by the mapper and the persisted notification record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated,
    OrderShipped,
    OrderDelivered,
    UserRegistered,
    ProductAdded,
    Manual,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 6] = [
        Self::OrderCreated,
        Self::OrderShipped,
        Self::OrderDelivered,
        Self::UserRegistered,
        Self::ProductAdded,
        Self::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCreated => "order_created",
            Self::OrderShipped => "order_shipped",
            Self::OrderDelivered => "order_delivered",
            Self::UserRegistered => "user_registered",
            Self::ProductAdded => "product_added",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['.', '-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| Error::validation(format!("unknown notification type: {}", s)))
    }
}

/// Raw domain event as published on the broker topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(alias = "eventType")]
    pub event_type: String,
    /// When the domain event occurred. Receipt time if the producer omitted it.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, timestamp: DateTime<Utc>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            event_type: event_type.into(),
            timestamp,
            data,
        }
    }

    /// Decode a broker payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::decode(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Mapper output, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDraft {
    pub kind: NotificationKind,
    /// Absent for broadcast notifications.
    pub recipient_id: Option<String>,
    pub title: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// A persisted notification.
///
/// The serde shape (`id, type, userId?, title, message, timestamp, read`) is
/// the cache wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(
        rename = "userId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub recipient_id: Option<String>,
    pub title: String,
    pub message: String,
    #[serde(rename = "timestamp")]
    pub occurred_at: DateTime<Utc>,
    pub read: bool,
}

impl NotificationRecord {
    pub(crate) fn from_draft(id: u64, draft: NotificationDraft) -> Self {
        Self {
            id,
            kind: draft.kind,
            recipient_id: draft.recipient_id,
            title: draft.title,
            message: draft.message,
            occurred_at: draft.occurred_at,
            read: false,
        }
    }
}
