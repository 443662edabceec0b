//! bridgeindex-bus: durable queues connecting producers to indexers.
//!
//! # Backends
//! - [`memory::MemoryBroker`]: in-process, for tests and ephemeral runs
//! - [`postgres::PgBroker`]: durable, rows in `bridgeindex_queue` (feature `postgres`)
//!
//! Producers publish through [`Publisher`] or [`MultiPublisher`]; indexers
//! implement [`BatchHandler`] and are driven by a [`Consumer`].

pub mod broker;
pub mod consumer;
pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod publisher;

pub use broker::{Broker, Delivery, Queue};
pub use consumer::{BatchHandler, Consumer, ConsumerConfig};
pub use error::BusError;
pub use memory::MemoryBroker;
pub use publisher::{MultiPublisher, Publish, Publisher};
