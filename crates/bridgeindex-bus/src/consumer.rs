//! Batched consumer with handler retry, dead-lettering and reconnect.
//!
//! Only handler failures that are not transient count towards
//! `handler_retry.max_attempts`. RPC, storage and bus outages are retried
//! until they clear, so an outage never dead-letters a batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridgeindex_core::message::Envelope;
use bridgeindex_core::retry::{millis, retry_async, RetryConfig, RetryPolicy};
use bridgeindex_core::IndexerError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, Delivery, Queue};
use crate::error::BusError;

/// Domain logic applied to each batch of envelopes.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, batch: &[Envelope]) -> Result<(), IndexerError>;
}

/// Consumer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Maximum deliveries handed to the handler at once.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Sleep between polls of an empty queue.
    #[serde(default = "default_poll_interval", with = "millis")]
    pub poll_interval: Duration,
    /// Attempts per batch before a non-transient failure dead-letters it.
    /// Its backoff also paces retries of transient failures.
    #[serde(default)]
    pub handler_retry: RetryConfig,
    /// Pause before reopening the queue after a delivery-loop error.
    #[serde(default = "default_reconnect_delay", with = "millis")]
    pub reconnect_delay: Duration,
}

fn default_batch_size() -> usize { 100 }
fn default_poll_interval() -> Duration { Duration::from_millis(500) }
fn default_reconnect_delay() -> Duration { Duration::from_secs(1) }

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval: default_poll_interval(),
            handler_retry: RetryConfig::default(),
            reconnect_delay: default_reconnect_delay(),
        }
    }
}

#[derive(Clone, Copy)]
enum Settle {
    Ack,
    Reject,
}

/// Reads one queue and feeds its batches to a [`BatchHandler`].
pub struct Consumer {
    broker: Arc<dyn Broker>,
    queue: String,
    handler: Arc<dyn BatchHandler>,
    config: ConsumerConfig,
    handler_policy: RetryPolicy,
    settle_policy: RetryPolicy,
}

impl Consumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        queue: impl Into<String>,
        handler: Arc<dyn BatchHandler>,
        config: ConsumerConfig,
    ) -> Self {
        let handler_policy = RetryPolicy::new(config.handler_retry.clone());
        // Settling and outages retry until they succeed or shutdown fires
        let settle_policy = RetryPolicy::new(RetryConfig {
            max_attempts: u32::MAX,
            ..config.handler_retry.clone()
        });
        Self {
            broker,
            queue: queue.into(),
            handler,
            config,
            handler_policy,
            settle_policy,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Consume until `shutdown` fires. Delivery-loop errors reopen the queue.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<(), IndexerError> {
        tracing::info!(queue = %self.queue, handler = self.handler.name(), "Starting consumer");
        loop {
            match self.serve(shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::error!(queue = %self.queue, error = %e, "Consumer loop failed, reopening");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }
        tracing::info!(queue = %self.queue, "Consumer stopped");
        Ok(())
    }

    async fn serve(&self, shutdown: &CancellationToken) -> Result<(), BusError> {
        let queue = self.broker.open_queue(&self.queue).await?;
        let returned = queue.return_unacked().await?;
        let purged = queue.purge_rejected().await?;
        let backlog = queue.ready_count().await?;
        tracing::info!(queue = %self.queue, returned, purged, backlog, "Queue opened");

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            let deliveries = queue.consume(self.config.batch_size).await?;
            if deliveries.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.config.poll_interval) => continue,
                }
            }
            self.process(queue.as_ref(), deliveries, shutdown).await;
        }
    }

    async fn process(&self, queue: &dyn Queue, deliveries: Vec<Delivery>, shutdown: &CancellationToken) {
        let mut tags = Vec::with_capacity(deliveries.len());
        let mut batch = Vec::with_capacity(deliveries.len());
        let mut undecodable = Vec::new();
        for delivery in deliveries {
            match Envelope::from_bytes(&delivery.body) {
                Ok(env) => {
                    tags.push(delivery.tag);
                    batch.push(env);
                }
                Err(e) => {
                    tracing::warn!(queue = %self.queue, tag = delivery.tag, error = %e, "Dead-lettering undecodable body");
                    undecodable.push(delivery.tag);
                }
            }
        }
        if !undecodable.is_empty() {
            self.settle(queue, Settle::Reject, &undecodable, shutdown).await;
        }
        if batch.is_empty() {
            return;
        }

        let handler = self.handler.name();
        match self.handle_batch(&batch, shutdown).await {
            Ok(()) => self.settle(queue, Settle::Ack, &tags, shutdown).await,
            // Left unacked; returned to the queue when it is next opened
            Err(_) if shutdown.is_cancelled() => {}
            Err(e) => {
                tracing::error!(
                    queue = %self.queue,
                    handler,
                    size = batch.len(),
                    error = %e,
                    "Batch failed on every attempt, dead-lettering"
                );
                self.settle(queue, Settle::Reject, &tags, shutdown).await;
            }
        }
    }

    /// Run the handler until it succeeds, exhausts its attempts on a
    /// non-transient error, or shutdown fires.
    async fn handle_batch(&self, batch: &[Envelope], shutdown: &CancellationToken) -> Result<(), IndexerError> {
        let handler = self.handler.name();
        let mut failures = 0u32;
        let mut outages = 0u32;
        loop {
            let err = match self.handler.handle(batch).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            let delay = if err.is_transient() {
                outages = outages.saturating_add(1);
                self.settle_policy.backoff(outages)
            } else {
                failures += 1;
                match self.handler_policy.next_delay(failures) {
                    Some(delay) => delay,
                    None => return Err(err),
                }
            };
            tracing::warn!(
                queue = %self.queue,
                handler,
                transient = err.is_transient(),
                failures,
                outages,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Batch failed, retrying"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn settle(&self, queue: &dyn Queue, how: Settle, tags: &[u64], shutdown: &CancellationToken) {
        let what = match how {
            Settle::Ack => "ack",
            Settle::Reject => "reject",
        };
        let result = retry_async(&self.settle_policy, shutdown, what, |_| async move {
            match how {
                Settle::Ack => queue.ack(tags).await,
                Settle::Reject => queue.reject(tags).await,
            }
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(queue = %self.queue, what, error = %e, "Gave up settling deliveries on shutdown");
        }
    }
}
