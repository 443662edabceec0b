//! bridgeindex-core: shared foundation for the bridge event pipeline.
//!
//! # Architecture
//!
//! ```text
//! Producer (per chain) ── publish ──► bus queue ── consume ──► indexer handler ──► storage
//!     │                                                            │
//!     └── CursorManager (resume point)                             └── re-fetch from core chain
//!
//! supervisor: every producer and consumer restarts with backoff
//! ```

pub mod cursor;
pub mod error;
pub mod logging;
pub mod message;
pub mod producer;
pub mod retry;
pub mod rpc;
pub mod supervisor;

pub use cursor::{cursor_key, Cursor, CursorManager, CursorStore, InitialPosition, MemoryCursorStore};
pub use error::IndexerError;
pub use message::{
    BlockRange, CollectionMessage, Envelope, EnvelopeError, ItemMessage, MessageFamily, OperationMessage,
    RangeMessage, TxContext, VoteChoice, WithdrawalEvent, WithdrawalMessage,
};
pub use producer::{ChainFamily, NoopProducer, Producer, ProducerRegistry};
pub use retry::{retry_async, RetryConfig, RetryPolicy};
pub use supervisor::{spawn_supervised, supervise, BackoffConfig, TaskSet};
