//! Notification pipeline.
//!
//! Incoming broker events are mapped to notification drafts, appended to the
//! in-process sequence and mirrored into the per-recipient cache.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use notify_relay::cache::InMemoryCache;
//! use notify_relay::config::{BrokerSettings, CacheSettings};
//! use notify_relay::notification::{NotificationService, NotificationStore};
//!
//! let store = Arc::new(NotificationStore::new(
//!     Arc::new(InMemoryCache::new()),
//!     CacheSettings::default(),
//! ));
//! let service = NotificationService::new(store, BrokerSettings::default());
//! let recent = service.list_recent(None);
//! ```

pub mod events;
pub mod mapper;
pub mod service;
pub mod stats;
pub mod store;

pub use events::{EventEnvelope, NotificationDraft, NotificationKind, NotificationRecord};
pub use mapper::{MappingRule, map_event, mapping_rules};
pub use service::{
    HealthStatus, ManualNotification, NOTIFICATION_SENT_EVENT, NotificationService, RecentListing,
};
pub use stats::{NotificationStats, summarize};
pub use store::{ListingSource, NotificationStore, RecipientListing};
