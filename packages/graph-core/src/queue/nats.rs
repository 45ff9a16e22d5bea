//! Real `Broker` backed by NATS JetStream work-queue streams. Each of the
//! four main queues (`preprocess_queue`, `graph_queue`, `description_queue`,
//! `delete_queue`) plus their `_retry`/`_dlq` siblings gets its own stream,
//! created lazily on first publish/consume.

use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull::Config as PullConfig, stream::Config as StreamConfig};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::error::{CoreError, Result};

use super::{Broker, Delivery, DeliveryHandle};

pub struct NatsBroker {
    jetstream: jetstream::Context,
}

impl NatsBroker {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            jetstream: jetstream::new(client),
        }
    }

    async fn stream(&self, queue: &str) -> Result<jetstream::stream::Stream> {
        self.jetstream
            .get_or_create_stream(StreamConfig {
                name: queue.to_string(),
                subjects: vec![queue.to_string()],
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await
            .map_err(|e| CoreError::Broker(e.into()))
    }

    async fn consumer(
        &self,
        queue: &str,
    ) -> Result<jetstream::consumer::Consumer<PullConfig>> {
        let stream = self.stream(queue).await?;
        stream
            .get_or_create_consumer(
                "worker",
                PullConfig {
                    durable_name: Some("worker".to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| CoreError::Broker(e.into()))
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn publish(&self, queue: &str, payload: Bytes) -> Result<()> {
        self.jetstream
            .publish(queue.to_string(), payload)
            .await
            .map_err(|e| CoreError::Broker(e.into()))?
            .await
            .map_err(|e| CoreError::Broker(e.into()))?;
        Ok(())
    }

    async fn next(&self, queue: &str, wait: Duration) -> Result<Option<Delivery>> {
        let consumer = self.consumer(queue).await?;
        let mut batch = consumer
            .fetch()
            .max_messages(1)
            .expires(wait)
            .messages()
            .await
            .map_err(|e| CoreError::Broker(e.into()))?;

        match batch.next().await {
            Some(Ok(message)) => Ok(Some(Delivery {
                payload: message.payload.clone(),
                handle: DeliveryHandle::Nats(message),
            })),
            Some(Err(e)) => Err(CoreError::Broker(e.into())),
            None => Ok(None),
        }
    }
}
