//! Broker and queue contracts shared by every backend.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BusError;

/// A message handed to a consumer. It stays unacknowledged until settled
/// with [`Queue::ack`] or [`Queue::reject`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
}

/// A named durable queue.
///
/// Deliveries move `ready → unacked → (acked | rejected)`. Rejected
/// deliveries are kept aside as dead letters until purged.
#[async_trait]
pub trait Queue: Send + Sync {
    fn name(&self) -> &str;

    /// Append bodies in order. Either all are enqueued or none are.
    async fn publish(&self, bodies: &[Vec<u8>]) -> Result<(), BusError>;

    /// Take up to `max` ready deliveries, oldest first.
    async fn consume(&self, max: usize) -> Result<Vec<Delivery>, BusError>;

    async fn ack(&self, tags: &[u64]) -> Result<(), BusError>;

    /// Dead-letter the deliveries.
    async fn reject(&self, tags: &[u64]) -> Result<(), BusError>;

    /// Put every unacknowledged delivery back in the ready set.
    async fn return_unacked(&self) -> Result<u64, BusError>;

    /// Drop dead-lettered deliveries.
    async fn purge_rejected(&self) -> Result<u64, BusError>;

    /// Number of deliveries waiting to be consumed.
    async fn ready_count(&self) -> Result<u64, BusError>;
}

/// Opens named queues, creating them on first use.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn open_queue(&self, name: &str) -> Result<Arc<dyn Queue>, BusError>;
}
