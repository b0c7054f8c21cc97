//! Single-partition broker over a newline-delimited JSON stream.
//!
//! Lets the relay consume from a pipe or file (`stdin` in the binary). The
//! stream cannot rewind, so commits only advance a counter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Delivery, EventBroker, Subscription};
use crate::{Error, Result};

/// Broker reading one payload per line.
pub struct LineStreamBroker<R> {
    reader: Arc<Mutex<Option<R>>>,
    committed: Arc<AtomicU64>,
}

impl<R> LineStreamBroker<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: Arc::new(Mutex::new(Some(reader))),
            committed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of lines committed so far.
    pub fn committed(&self) -> u64 {
        self.committed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R> EventBroker for LineStreamBroker<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn subscribe(&self, topic: &str, _group_id: &str) -> Result<Box<dyn Subscription>> {
        let reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::broker("line stream already consumed"))?;

        Ok(Box::new(LineSubscription {
            reader,
            topic: topic.to_string(),
            next_offset: 0,
            committed: Arc::clone(&self.committed),
            line: Vec::new(),
        }))
    }
}

struct LineSubscription<R> {
    reader: R,
    topic: String,
    next_offset: u64,
    committed: Arc<AtomicU64>,
    line: Vec<u8>,
}

#[async_trait]
impl<R> Subscription for LineSubscription<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.line)
                .await
                .map_err(|e| Error::broker(format!("line stream read failed: {}", e)))?;
            if read == 0 {
                return Ok(None);
            }

            let offset = self.next_offset;
            self.next_offset += 1;

            // Raw bytes: invalid UTF-8 is a decode failure for this one
            // message, not a broken stream.
            let trimmed = self.line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(Delivery {
                topic: self.topic.clone(),
                partition: 0,
                offset,
                payload: Bytes::copy_from_slice(trimmed),
            }));
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<()> {
        self.committed.fetch_max(delivery.offset + 1, Ordering::SeqCst);
        debug!(offset = delivery.offset, "Committed line offset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_lines_and_skips_blanks() {
        let input: &[u8] = b"{\"a\":1}\n\n  \n{\"b\":2}\n";
        let broker = LineStreamBroker::new(input);

        let mut sub = broker.subscribe("app-events", "g").await.unwrap();
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.payload, Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(first.offset, 0);
        sub.commit(&first).await.unwrap();

        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.payload, Bytes::from_static(b"{\"b\":2}"));
        assert_eq!(second.offset, 3);
        sub.commit(&second).await.unwrap();

        assert!(sub.next().await.unwrap().is_none());
        assert_eq!(broker.committed(), 4);
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_delivered_raw() {
        let input: &[u8] = b"{\"a\":1}\n\xff\xfe garbage\n{\"b\":2}\n";
        let broker = LineStreamBroker::new(input);

        let mut sub = broker.subscribe("app-events", "g").await.unwrap();
        let payloads: Vec<Bytes> = [
            sub.next().await.unwrap().unwrap(),
            sub.next().await.unwrap().unwrap(),
            sub.next().await.unwrap().unwrap(),
        ]
        .into_iter()
        .map(|d| d.payload)
        .collect();

        assert_eq!(payloads[1], Bytes::from_static(b"\xff\xfe garbage"));
        assert_eq!(payloads[2], Bytes::from_static(b"{\"b\":2}"));
        assert!(sub.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_subscribe_fails() {
        let broker = LineStreamBroker::new(&b""[..]);
        assert!(broker.subscribe("t", "g").await.is_ok());
        assert!(matches!(
            broker.subscribe("t", "g").await,
            Err(Error::BrokerConnectionLost(_))
        ));
    }
}
