//! Broker abstraction (§6): durable FIFO queues, each with `_retry`/`_dlq`
//! siblings, carrying the envelopes in `graph_types::envelope`.
//!
//! Generalizes `kernel::nats`'s publish-only `NatsPublisher` trait to also
//! pull-consume with ack/nak — the ingest worker needs at-least-once
//! redelivery on failure, not fire-and-forget pub/sub.

pub mod nats;
pub mod worker;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CoreError, Result};

pub use nats::NatsBroker;

enum DeliveryHandle {
    Nats(async_nats::jetstream::Message),
    #[cfg(test)]
    Test,
}

/// One pulled message. Must be acked on success or naked on failure so
/// JetStream redelivers it (eventually onto the queue's `_retry`/`_dlq`
/// siblings, per the stream's max-deliver policy).
pub struct Delivery {
    pub payload: Bytes,
    handle: DeliveryHandle,
}

impl Delivery {
    pub async fn ack(self) -> Result<()> {
        match self.handle {
            DeliveryHandle::Nats(message) => message
                .ack()
                .await
                .map_err(|e| CoreError::Broker(e.into())),
            #[cfg(test)]
            DeliveryHandle::Test => Ok(()),
        }
    }

    pub async fn nak(self) -> Result<()> {
        match self.handle {
            DeliveryHandle::Nats(message) => message
                .ack_with(async_nats::jetstream::AckKind::Nak(None))
                .await
                .map_err(|e| CoreError::Broker(e.into())),
            #[cfg(test)]
            DeliveryHandle::Test => Ok(()),
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, queue: &str, payload: Bytes) -> Result<()>;

    /// Pulls the next message off `queue`, waiting up to `wait` for one to
    /// arrive. `None` means the wait elapsed with nothing available.
    async fn next(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>>;
}

pub async fn publish_json<T: Serialize + Sync>(
    broker: &dyn Broker,
    queue: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| CoreError::Broker(Box::new(e)))?;
    broker.publish(queue, Bytes::from(bytes)).await
}

pub fn decode_json<T: DeserializeOwned>(delivery: &Delivery) -> Result<T> {
    serde_json::from_slice(&delivery.payload).map_err(|e| CoreError::Broker(Box::new(e)))
}

#[cfg(test)]
pub mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory `Broker` for unit tests: FIFO per queue, plus a running log
    /// of every publish so tests can assert on what would have gone out.
    #[derive(Default)]
    pub struct InMemoryBroker {
        queues: Mutex<HashMap<String, Vec<Bytes>>>,
        log: Mutex<Vec<(String, Bytes)>>,
    }

    impl InMemoryBroker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn published(&self, queue: &str) -> Vec<Bytes> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(q, _)| q == queue)
                .map(|(_, payload)| payload.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Broker for InMemoryBroker {
        async fn publish(&self, queue: &str, payload: Bytes) -> Result<()> {
            self.log.lock().unwrap().push((queue.to_string(), payload.clone()));
            self.queues
                .lock()
                .unwrap()
                .entry(queue.to_string())
                .or_default()
                .push(payload);
            Ok(())
        }

        async fn next(&self, queue: &str, _wait: Duration) -> Result<Option<Delivery>> {
            let mut queues = self.queues.lock().unwrap();
            let payload = queues
                .get_mut(queue)
                .filter(|q| !q.is_empty())
                .map(|q| q.remove(0));
            Ok(payload.map(|payload| Delivery {
                payload,
                handle: DeliveryHandle::Test,
            }))
        }
    }

    #[tokio::test]
    async fn publish_then_next_round_trips() {
        let broker = InMemoryBroker::new();
        broker.publish("graph_queue", Bytes::from_static(b"hello")).await.unwrap();

        let delivery = broker.next("graph_queue", Duration::from_millis(10)).await.unwrap();
        assert_eq!(delivery.unwrap().payload, Bytes::from_static(b"hello"));
        assert!(broker.next("graph_queue", Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn published_log_survives_consumption() {
        let broker = InMemoryBroker::new();
        broker.publish("delete_queue", Bytes::from_static(b"x")).await.unwrap();
        let _ = broker.next("delete_queue", Duration::from_millis(10)).await.unwrap();
        assert_eq!(broker.published("delete_queue").len(), 1);
    }
}
