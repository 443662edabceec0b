//! Batched publishers.

use std::sync::Arc;

use async_trait::async_trait;
use bridgeindex_core::message::{to_envelopes, Envelope, MessageFamily};
use bridgeindex_core::retry::{retry_async, RetryConfig, RetryPolicy};
use bridgeindex_core::IndexerError;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Queue};
use crate::error::BusError;

/// Something envelopes can be published to.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish_msgs(&self, msgs: &[Envelope]) -> Result<(), IndexerError>;
}

/// Publishes batches to one named queue, retrying transient broker failures.
pub struct Publisher {
    queue: Arc<dyn Queue>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl Publisher {
    pub fn new(queue: Arc<dyn Queue>, retry: RetryConfig) -> Self {
        Self {
            queue,
            policy: RetryPolicy::new(retry),
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn open(broker: &dyn Broker, queue: &str, retry: RetryConfig) -> Result<Self, BusError> {
        Ok(Self::new(broker.open_queue(queue).await?, retry))
    }

    /// Stop retrying once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// Encode and publish typed messages.
    pub async fn publish<M: MessageFamily>(&self, msgs: &[M]) -> Result<(), IndexerError> {
        self.publish_msgs(&to_envelopes(msgs)?).await
    }
}

#[async_trait]
impl Publish for Publisher {
    async fn publish_msgs(&self, msgs: &[Envelope]) -> Result<(), IndexerError> {
        if msgs.is_empty() {
            return Ok(());
        }
        let bodies = msgs.iter().map(Envelope::to_bytes).collect::<Result<Vec<_>, _>>()?;
        let queue = self.queue.name();

        retry_async(&self.policy, &self.shutdown, queue, |_| self.queue.publish(&bodies)).await?;
        tracing::debug!(queue, count = msgs.len(), "Published batch");
        Ok(())
    }
}

/// Publishes the same batch to several queues in order.
///
/// A failure on any queue fails the whole call. Earlier queues keep what they
/// received, so callers must not advance their cursor on error.
pub struct MultiPublisher {
    publishers: Vec<Publisher>,
}

impl MultiPublisher {
    pub fn new(publishers: Vec<Publisher>) -> Self {
        Self { publishers }
    }

    pub async fn open(broker: &dyn Broker, queues: &[String], retry: RetryConfig) -> Result<Self, BusError> {
        let mut publishers = Vec::with_capacity(queues.len());
        for queue in queues {
            publishers.push(Publisher::open(broker, queue, retry.clone()).await?);
        }
        Ok(Self::new(publishers))
    }

    pub async fn publish<M: MessageFamily>(&self, msgs: &[M]) -> Result<(), IndexerError> {
        self.publish_msgs(&to_envelopes(msgs)?).await
    }
}

#[async_trait]
impl Publish for MultiPublisher {
    async fn publish_msgs(&self, msgs: &[Envelope]) -> Result<(), IndexerError> {
        let total = self.publishers.len();
        for (done, publisher) in self.publishers.iter().enumerate() {
            publisher.publish_msgs(msgs).await.map_err(|e| {
                IndexerError::Bus(format!(
                    "fan-out stopped at queue '{}' ({done}/{total} delivered): {e}",
                    publisher.queue_name()
                ))
            })?;
        }
        Ok(())
    }
}
