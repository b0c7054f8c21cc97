//! Event consumer loop.
//!
//! Subscribes to the events topic, maps every envelope to a notification and
//! appends it to the store. A message is committed only after its handling
//! has finished, so delivery is at-least-once: a redelivered event produces
//! a second notification.
//!
//! Failures local to one message are logged and skipped. A lost broker
//! connection tears down the subscription and triggers a reconnect with
//! bounded backoff; the loop only fails once the retries are exhausted.

mod backoff;

pub use backoff::ReconnectPolicy;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Delivery, EventBroker, Subscription};
use crate::config::BrokerSettings;
use crate::notification::{EventEnvelope, NotificationStore, map_event};
use crate::{Error, Result};

/// Why a subscription session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    StreamEnded,
}

/// Result of handling a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A notification was appended with this id.
    Appended(u64),
    /// The event type has no mapping.
    Skipped,
    /// The payload could not be decoded.
    Failed,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    appended: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    reconnects: AtomicU64,
}

/// Snapshot of consumer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub appended: u64,
    pub skipped: u64,
    pub failed: u64,
    pub reconnects: u64,
}

/// Broker-to-store relay loop.
pub struct EventConsumer {
    broker: Arc<dyn EventBroker>,
    store: Arc<NotificationStore>,
    settings: BrokerSettings,
    policy: ReconnectPolicy,
    cancellation_token: CancellationToken,
    counters: Counters,
}

impl EventConsumer {
    pub fn new(
        broker: Arc<dyn EventBroker>,
        store: Arc<NotificationStore>,
        settings: BrokerSettings,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            broker,
            store,
            settings,
            policy,
            cancellation_token: CancellationToken::new(),
            counters: Counters::default(),
        }
    }

    /// Token that stops the loop after the in-flight message.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Request an orderly stop.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            received: self.counters.received.load(Ordering::Relaxed),
            appended: self.counters.appended.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Run the loop on a background task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<Result<()>> {
        let consumer = Arc::clone(self);
        tokio::spawn(async move { consumer.run().await })
    }

    /// Consume until stopped, until the stream ends, or until reconnecting
    /// fails `max_retries` times in a row.
    pub async fn run(&self) -> Result<()> {
        let topic = self.settings.topic.as_str();
        let mut attempt: u32 = 0;

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(topic = %topic, "Event consumer stopped");
                return Ok(());
            }

            let mut processed = 0u64;
            let failure = match self.open_subscription().await {
                Ok(subscription) => {
                    info!(
                        topic = %topic,
                        group = %self.settings.group_id,
                        "Event consumer subscribed"
                    );
                    match self.consume(subscription, &mut processed).await {
                        Ok(SessionEnd::Cancelled) => {
                            info!(topic = %topic, "Event consumer stopped");
                            return Ok(());
                        }
                        Ok(SessionEnd::StreamEnded) => {
                            info!(topic = %topic, "Event stream ended");
                            return Ok(());
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            // A session that made progress starts a fresh retry budget.
            if processed > 0 {
                attempt = 0;
            }
            attempt += 1;

            if !self.policy.should_retry(attempt) {
                error!(
                    topic = %topic,
                    attempts = attempt - 1,
                    error = %failure,
                    "Giving up on broker subscription"
                );
                return Err(failure);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                topic = %topic,
                attempt,
                max_retries = self.policy.max_retries,
                error = %failure,
                "Broker subscription lost, reconnecting in {:?}",
                delay
            );
            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);

            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    info!(topic = %topic, "Event consumer stopped while reconnecting");
                    return Ok(());
                }
                _ = sleep(delay) => {}
            }
        }
    }

    async fn open_subscription(&self) -> Result<Box<dyn Subscription>> {
        let op_timeout = self.settings.operation_timeout();
        match timeout(
            op_timeout,
            self.broker
                .subscribe(&self.settings.topic, &self.settings.group_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: "broker.subscribe",
                timeout_ms: op_timeout.as_millis() as u64,
            }),
        }
    }

    async fn consume(
        &self,
        mut subscription: Box<dyn Subscription>,
        processed: &mut u64,
    ) -> Result<SessionEnd> {
        let op_timeout = self.settings.operation_timeout();

        loop {
            // Cancellation is only observed between messages, never while one
            // is being handled.
            let next = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => return Ok(SessionEnd::Cancelled),
                next = subscription.next() => next?,
            };
            let Some(delivery) = next else {
                return Ok(SessionEnd::StreamEnded);
            };

            self.handle_delivery(&delivery).await;

            match timeout(op_timeout, subscription.commit(&delivery)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if !e.is_recoverable() => return Err(e),
                Ok(Err(e)) => {
                    warn!(
                        partition = delivery.partition,
                        offset = delivery.offset,
                        error = %e,
                        "Failed to commit offset"
                    );
                }
                Err(_) => {
                    warn!(
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Offset commit timed out after {:?}",
                        op_timeout
                    );
                }
            }
            *processed += 1;
        }
    }

    /// Decode, map and store one delivery. Never fails the loop.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> DeliveryOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let envelope = match EventEnvelope::decode(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Error processing message"
                );
                return DeliveryOutcome::Failed;
            }
        };

        debug!(
            event_type = %envelope.event_type,
            partition = delivery.partition,
            offset = delivery.offset,
            "Processing event"
        );

        match map_event(&envelope) {
            Some(draft) => {
                let record = self.store.append(draft).await;
                self.counters.appended.fetch_add(1, Ordering::Relaxed);
                info!(
                    notification_id = record.id,
                    kind = %record.kind,
                    "Notification created: {}",
                    record.title
                );
                DeliveryOutcome::Appended(record.id)
            }
            None => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                debug!(event_type = %envelope.event_type, "No notification for event type");
                DeliveryOutcome::Skipped
            }
        }
    }
}
