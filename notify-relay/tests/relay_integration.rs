//! End-to-end tests: broker deliveries flow through the consumer into the
//! store and come back out through the query surface.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use notify_relay::broker::{EventBroker, EventPublisher, InMemoryBroker, LineStreamBroker};
use notify_relay::cache::{CacheBackend, InMemoryCache};
use notify_relay::config::{BrokerSettings, CacheSettings};
use notify_relay::consumer::{EventConsumer, ReconnectPolicy};
use notify_relay::notification::{
    EventEnvelope, ListingSource, ManualNotification, NotificationKind, NotificationService,
    NotificationStore,
};
use serde_json::json;

struct Harness {
    broker: InMemoryBroker,
    cache: InMemoryCache,
    store: Arc<NotificationStore>,
    consumer: Arc<EventConsumer>,
}

fn harness() -> Harness {
    let broker = InMemoryBroker::new(3);
    let cache = InMemoryCache::new();
    let store = Arc::new(NotificationStore::new(
        Arc::new(cache.clone()),
        CacheSettings::default(),
    ));
    let policy = ReconnectPolicy {
        max_retries: 3,
        initial_delay_ms: 5,
        max_delay_ms: 20,
        use_jitter: false,
        ..Default::default()
    };
    let consumer = Arc::new(EventConsumer::new(
        Arc::new(broker.clone()),
        Arc::clone(&store),
        BrokerSettings::default(),
        policy,
    ));
    Harness {
        broker,
        cache,
        store,
        consumer,
    }
}

async fn publish(broker: &InMemoryBroker, key: Option<&str>, event: serde_json::Value) {
    broker
        .publish(
            "app-events",
            key,
            Bytes::from(serde_json::to_vec(&event).unwrap()),
        )
        .await
        .unwrap();
}

fn order_created(order_id: u64, user_id: &str) -> serde_json::Value {
    json!({
        "event_type": "order_created",
        "timestamp": "2024-05-01T12:00:00Z",
        "data": {"order_id": order_id, "user_id": user_id, "total": 42.5}
    })
}

/// Publish everything, close the broker and drain it through the consumer.
async fn drain(h: &Harness) {
    h.broker.close();
    tokio::time::timeout(Duration::from_secs(5), h.consumer.run())
        .await
        .expect("consumer should finish once the broker is drained")
        .unwrap();
}

#[tokio::test]
async fn test_events_flow_to_store_and_cache() {
    let h = harness();
    publish(&h.broker, Some("u1"), order_created(1, "u1")).await;
    publish(
        &h.broker,
        Some("u1"),
        json!({
            "event_type": "order_shipped",
            "timestamp": "2024-05-01T13:00:00Z",
            "data": {"order_id": 1, "user_id": "u1", "tracking_number": "TRK-9"}
        }),
    )
    .await;
    publish(
        &h.broker,
        None,
        json!({
            "event_type": "product_added",
            "timestamp": "2024-05-01T14:00:00Z",
            "data": {"name": "Lamp"}
        }),
    )
    .await;
    drain(&h).await;

    assert_eq!(h.store.len(), 3);
    let stats = h.consumer.stats();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.appended, 3);

    let listing = h.store.list_for_recipient("u1", 20).await;
    assert_eq!(listing.source, ListingSource::Cache);
    let kinds: Vec<_> = listing.notifications.iter().map(|n| n.kind).collect();
    assert_eq!(
        kinds,
        vec![NotificationKind::OrderCreated, NotificationKind::OrderShipped]
    );
    assert_eq!(
        listing.notifications[1].message,
        "Your order #1 has been shipped"
    );

    // Broadcast notifications are not cached for anyone.
    assert_eq!(h.cache.len(), 1);
    assert!(
        h.cache
            .ttl("notifications:u1")
            .await
            .unwrap()
            .is_some_and(|ttl| ttl <= Duration::from_secs(7 * 24 * 60 * 60))
    );
}

#[tokio::test]
async fn test_unrecognized_and_malformed_events_are_not_appended() {
    let h = harness();
    publish(
        &h.broker,
        None,
        json!({"event_type": "inventory_synced", "data": {}}),
    )
    .await;
    h.broker
        .publish("app-events", None, Bytes::from_static(b"{broken"))
        .await
        .unwrap();
    publish(&h.broker, Some("u2"), order_created(7, "u2")).await;
    drain(&h).await;

    assert_eq!(h.store.len(), 1);
    let stats = h.consumer.stats();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.appended, 1);
}

#[tokio::test]
async fn test_duplicate_delivery_yields_two_records() {
    let h = harness();
    let event = order_created(5, "u3");
    publish(&h.broker, Some("u3"), event.clone()).await;
    publish(&h.broker, Some("u3"), event).await;
    drain(&h).await;

    let all = h.store.list_all();
    assert_eq!(all.len(), 2);
    assert_ne!(all[0].id, all[1].id);
    assert_eq!(all[0].title, all[1].title);
}

#[tokio::test]
async fn test_summary_matches_listing() {
    let h = harness();
    for i in 0..6 {
        publish(&h.broker, Some("u4"), order_created(i, "u4")).await;
    }
    drain(&h).await;

    let all = h.store.list_all();
    h.store.mark_read(all[0].id).await.unwrap();
    h.store.mark_read(all[3].id).await.unwrap();

    let stats = h.store.summarize();
    assert_eq!(stats.total, h.store.list_all().len());
    assert_eq!(stats.read_count, 2);
    assert_eq!(stats.unread_count, 4);
    assert_eq!(stats.by_type[&NotificationKind::OrderCreated], 6);
}

#[tokio::test]
async fn test_concurrent_mark_read_is_consistent() {
    let h = harness();
    for i in 0..10 {
        publish(&h.broker, Some("u5"), order_created(i, "u5")).await;
    }
    drain(&h).await;

    let ids: Vec<u64> = h.store.list_all().iter().map(|n| n.id).collect();
    let results = futures::future::join_all(ids.iter().map(|&id| {
        let store = Arc::clone(&h.store);
        async move { store.mark_read(id).await }
    }))
    .await;
    assert!(results.iter().all(Result::is_ok));

    assert!(h.store.list_all().iter().all(|n| n.read));
    let listing = h.store.list_for_recipient("u5", 20).await;
    assert_eq!(listing.source, ListingSource::Cache);
    assert_eq!(listing.notifications.len(), 10);
    assert!(listing.notifications.iter().all(|n| n.read));
}

#[tokio::test]
async fn test_cache_outage_falls_back_to_sequence() {
    let h = harness();
    h.cache.set_available(false);
    publish(&h.broker, Some("u6"), order_created(1, "u6")).await;
    drain(&h).await;

    assert_eq!(h.store.len(), 1);
    let listing = h.store.list_for_recipient("u6", 20).await;
    assert_eq!(listing.source, ListingSource::Fallback);
    assert_eq!(listing.notifications.len(), 1);
}

#[tokio::test]
async fn test_manual_send_publishes_and_is_not_relayed() {
    let h = harness();
    let service = NotificationService::new(Arc::clone(&h.store), BrokerSettings::default())
        .with_publisher(Arc::new(h.broker.clone()));

    let record = service
        .send_manual(ManualNotification {
            recipient_id: Some("u7".to_string()),
            title: "Hello".to_string(),
            message: "Manual".to_string(),
            kind: None,
        })
        .await
        .unwrap();
    assert_eq!(record.kind, NotificationKind::Manual);

    // The consumer sees the notification_sent event but has no mapping for it.
    drain(&h).await;
    assert_eq!(h.consumer.stats().skipped, 1);
    assert_eq!(h.store.len(), 1);
    assert_eq!(service.list_recent(None).count, 1);
}

#[tokio::test]
async fn test_line_stream_broker_end_to_end() {
    let input = [
        serde_json::to_string(&order_created(1, "u8")).unwrap(),
        String::new(),
        serde_json::to_string(&json!({
            "eventType": "user_registered",
            "data": {"user_id": "u8", "name": "Ada", "email": "ada@example.com"}
        }))
        .unwrap(),
    ]
    .join("\n");

    let broker = Arc::new(LineStreamBroker::new(std::io::Cursor::new(
        input.into_bytes(),
    )));
    let store = Arc::new(NotificationStore::new(
        Arc::new(InMemoryCache::new()),
        CacheSettings::default(),
    ));
    let consumer = EventConsumer::new(
        Arc::clone(&broker) as Arc<dyn EventBroker>,
        Arc::clone(&store),
        BrokerSettings::default(),
        ReconnectPolicy::default(),
    );
    consumer.run().await.unwrap();

    let listing = store.list_for_recipient("u8", 20).await;
    let kinds: Vec<_> = listing.notifications.iter().map(|n| n.kind).collect();
    assert_eq!(
        kinds,
        vec![NotificationKind::OrderCreated, NotificationKind::UserRegistered]
    );
    assert_eq!(broker.committed(), 3);

    let envelope = EventEnvelope::decode(
        serde_json::to_string(&order_created(2, "u8"))
            .unwrap()
            .as_bytes(),
    )
    .unwrap();
    assert_eq!(envelope.event_type, "order_created");
}

#[tokio::test]
async fn test_line_stream_skips_non_utf8_line() {
    let mut input = serde_json::to_vec(&order_created(1, "u9")).unwrap();
    input.extend_from_slice(b"\n\xff\xfe garbage\n");
    input.extend_from_slice(&serde_json::to_vec(&order_created(2, "u9")).unwrap());
    input.push(b'\n');

    let broker = Arc::new(LineStreamBroker::new(std::io::Cursor::new(input)));
    let store = Arc::new(NotificationStore::new(
        Arc::new(InMemoryCache::new()),
        CacheSettings::default(),
    ));
    let consumer = EventConsumer::new(
        Arc::clone(&broker) as Arc<dyn EventBroker>,
        Arc::clone(&store),
        BrokerSettings::default(),
        ReconnectPolicy::default(),
    );
    consumer.run().await.unwrap();

    assert_eq!(store.len(), 2);
    let stats = consumer.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.reconnects, 0);
    assert_eq!(broker.committed(), 3);
}
