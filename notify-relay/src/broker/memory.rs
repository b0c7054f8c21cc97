//! In-process partitioned broker.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{Delivery, EventBroker, EventPublisher, Subscription};
use crate::{Error, Result};

#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Vec<Bytes>>,
    /// Next offset to deliver, keyed by `(group, partition)`.
    committed: HashMap<(String, u32), u64>,
}

impl TopicLog {
    fn new(partition_count: u32) -> Self {
        Self {
            partitions: vec![Vec::new(); partition_count as usize],
            committed: HashMap::new(),
        }
    }
}

struct BrokerInner {
    partition_count: u32,
    topics: Mutex<HashMap<String, TopicLog>>,
    notify: Notify,
    connected: AtomicBool,
    closed: AtomicBool,
    /// Bumped on every disconnect so stale subscriptions notice.
    epoch: AtomicU64,
    round_robin: AtomicU64,
}

impl BrokerInner {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::broker("in-memory broker disconnected"))
        }
    }

    fn ensure_session(&self, epoch: u64) -> Result<()> {
        self.ensure_connected()?;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(Error::broker("subscription invalidated by reconnect"));
        }
        Ok(())
    }

    fn partition_for(&self, key: Option<&str>) -> u32 {
        let slot = match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                hasher.finish()
            }
            None => self.round_robin.fetch_add(1, Ordering::Relaxed),
        };
        (slot % self.partition_count as u64) as u32
    }
}

/// Partitioned, at-least-once broker living in process memory.
///
/// Messages with the same key land on the same partition. A subscription
/// resumes from its group's committed offsets, so anything delivered but not
/// committed before a disconnect is delivered again.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new(partition_count: u32) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                partition_count: partition_count.max(1),
                topics: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                connected: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                round_robin: AtomicU64::new(0),
            }),
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.inner.partition_count
    }

    /// Drop the connection: open subscriptions fail and new ones are refused.
    pub fn disconnect(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        info!("In-memory broker disconnected");
    }

    pub fn reconnect(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
        info!("In-memory broker reconnected");
    }

    /// End all streams once their backlog is drained.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Number of messages ever published to a partition.
    pub fn partition_len(&self, topic: &str, partition: u32) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|log| log.partitions.get(partition as usize))
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Next offset the group will receive on `partition`, if it committed any.
    pub fn committed_offset(&self, topic: &str, group_id: &str, partition: u32) -> Option<u64> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|log| log.committed.get(&(group_id.to_string(), partition)).copied())
    }
}

#[async_trait]
impl EventBroker for InMemoryBroker {
    async fn subscribe(&self, topic: &str, group_id: &str) -> Result<Box<dyn Subscription>> {
        self.inner.ensure_connected()?;
        let epoch = self.inner.epoch.load(Ordering::SeqCst);

        let positions = {
            let mut topics = self.inner.topics.lock();
            let log = topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::new(self.inner.partition_count));
            (0..self.inner.partition_count)
                .map(|p| {
                    log.committed
                        .get(&(group_id.to_string(), p))
                        .copied()
                        .unwrap_or(0)
                })
                .collect::<Vec<_>>()
        };

        debug!(topic = %topic, group = %group_id, ?positions, "Subscribed to in-memory topic");
        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            epoch,
            positions,
            cursor: 0,
        }))
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: Bytes) -> Result<()> {
        self.inner.ensure_connected()?;
        let partition = self.inner.partition_for(key);
        {
            let mut topics = self.inner.topics.lock();
            let log = topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::new(self.inner.partition_count));
            log.partitions[partition as usize].push(payload);
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

struct MemorySubscription {
    inner: Arc<BrokerInner>,
    topic: String,
    group_id: String,
    epoch: u64,
    positions: Vec<u64>,
    /// Partition to look at first, rotated for fairness.
    cursor: usize,
}

impl MemorySubscription {
    fn poll_ready(&mut self) -> Option<Delivery> {
        let topics = self.inner.topics.lock();
        let log = topics.get(&self.topic)?;
        let count = self.positions.len();

        for step in 0..count {
            let partition = (self.cursor + step) % count;
            let offset = self.positions[partition];
            if let Some(payload) = log.partitions[partition].get(offset as usize) {
                self.positions[partition] = offset + 1;
                self.cursor = (partition + 1) % count;
                return Some(Delivery {
                    topic: self.topic.clone(),
                    partition: partition as u32,
                    offset,
                    payload: payload.clone(),
                });
            }
        }
        None
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        let inner = Arc::clone(&self.inner);
        loop {
            // Register interest before checking state so a publish in between
            // is not missed.
            let notified = inner.notify.notified();

            inner.ensure_session(self.epoch)?;
            if let Some(delivery) = self.poll_ready() {
                return Ok(Some(delivery));
            }
            if inner.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            notified.await;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<()> {
        self.inner.ensure_session(self.epoch)?;
        let mut topics = self.inner.topics.lock();
        if let Some(log) = topics.get_mut(&self.topic) {
            let next = log
                .committed
                .entry((self.group_id.clone(), delivery.partition))
                .or_insert(0);
            *next = (*next).max(delivery.offset + 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "app-events";
    const GROUP: &str = "test-group";

    #[tokio::test]
    async fn test_keyed_messages_keep_partition_order() {
        let broker = InMemoryBroker::new(4);
        for i in 0..5 {
            broker
                .publish(TOPIC, Some("u1"), Bytes::from(i.to_string()))
                .await
                .unwrap();
        }

        let mut sub = broker.subscribe(TOPIC, GROUP).await.unwrap();
        let mut seen = Vec::new();
        let mut partitions = Vec::new();
        for _ in 0..5 {
            let d = sub.next().await.unwrap().unwrap();
            partitions.push(d.partition);
            seen.push(String::from_utf8(d.payload.to_vec()).unwrap());
        }
        assert_eq!(seen, vec!["0", "1", "2", "3", "4"]);
        assert!(partitions.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(broker.partition_len(TOPIC, partitions[0]), 5);
        let total: usize = (0..broker.partition_count())
            .map(|p| broker.partition_len(TOPIC, p))
            .sum();
        assert_eq!(total, 5);
        assert_eq!(broker.partition_len("other-topic", 0), 0);
    }

    #[tokio::test]
    async fn test_uncommitted_messages_are_redelivered() {
        let broker = InMemoryBroker::new(1);
        broker.publish(TOPIC, None, Bytes::from("a")).await.unwrap();
        broker.publish(TOPIC, None, Bytes::from("b")).await.unwrap();

        let mut sub = broker.subscribe(TOPIC, GROUP).await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        sub.commit(&first).await.unwrap();
        let _second = sub.next().await.unwrap().unwrap();

        broker.disconnect();
        assert!(matches!(
            sub.next().await,
            Err(Error::BrokerConnectionLost(_))
        ));
        assert!(broker.subscribe(TOPIC, GROUP).await.is_err());

        broker.reconnect();
        let mut sub = broker.subscribe(TOPIC, GROUP).await.unwrap();
        let redelivered = sub.next().await.unwrap().unwrap();
        assert_eq!(redelivered.payload, Bytes::from("b"));
        assert_eq!(broker.committed_offset(TOPIC, GROUP, 0), Some(1));
    }

    #[tokio::test]
    async fn test_next_waits_for_publish() {
        let broker = InMemoryBroker::new(2);
        let mut sub = broker.subscribe(TOPIC, GROUP).await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            publisher
                .publish(TOPIC, Some("k"), Bytes::from("late"))
                .await
                .unwrap();
        });

        let d = sub.next().await.unwrap().unwrap();
        assert_eq!(d.payload, Bytes::from("late"));
    }

    #[tokio::test]
    async fn test_close_ends_stream_after_backlog() {
        let broker = InMemoryBroker::new(1);
        broker.publish(TOPIC, None, Bytes::from("x")).await.unwrap();
        broker.close();

        let mut sub = broker.subscribe(TOPIC, GROUP).await.unwrap();
        assert!(sub.next().await.unwrap().is_some());
        assert!(sub.next().await.unwrap().is_none());
    }
}
