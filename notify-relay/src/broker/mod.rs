//! Broker collaborator.
//!
//! The relay only needs a subscription yielding `(partition, offset,
//! payload)` deliveries with at-least-once, per-partition ordered semantics,
//! an explicit commit, and a publish call for the manual send path.

mod lines;
mod memory;

pub use lines::LineStreamBroker;
pub use memory::InMemoryBroker;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub payload: Bytes,
}

/// Broker able to open subscriptions.
#[async_trait]
pub trait EventBroker: Send + Sync {
    /// Subscribe `group_id` to `topic`, resuming after its committed offsets.
    async fn subscribe(&self, topic: &str, group_id: &str) -> Result<Box<dyn Subscription>>;
}

/// An open subscription.
///
/// Any `Error::BrokerConnectionLost` invalidates the subscription; the caller
/// must subscribe again.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `Ok(None)` means the stream has ended.
    async fn next(&mut self) -> Result<Option<Delivery>>;

    /// Mark `delivery` (and everything before it in its partition) processed.
    async fn commit(&mut self, delivery: &Delivery) -> Result<()>;
}

/// Producer side of the broker.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `payload`; `key` selects the partition when present.
    async fn publish(&self, topic: &str, key: Option<&str>, payload: Bytes) -> Result<()>;
}
