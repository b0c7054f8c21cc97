//! Notification statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::events::{NotificationKind, NotificationRecord};

/// Counts derived from a single scan of the in-process sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStats {
    pub total: usize,
    #[serde(rename = "read")]
    pub read_count: usize,
    #[serde(rename = "unread")]
    pub unread_count: usize,
    pub by_type: BTreeMap<NotificationKind, usize>,
}

/// Summarize `records`. Kinds without records are omitted from `by_type`.
pub fn summarize(records: &[NotificationRecord]) -> NotificationStats {
    let mut stats = NotificationStats {
        total: records.len(),
        ..Default::default()
    };

    for record in records {
        if record.read {
            stats.read_count += 1;
        } else {
            stats.unread_count += 1;
        }
        *stats.by_type.entry(record.kind).or_insert(0) += 1;
    }

    stats
}
