//! bridgeindex-storage: the relational aggregate behind the indexers.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - `postgres`: PostgreSQL via `sqlx`, plus the Postgres cursor store

pub mod memory;
pub mod store;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStorage;
pub use store::{Storage, StorageTx};
pub use types::{
    Approval, Collection, CollectionData, Confirmation, Item, ItemChainMapping, Rejection, Seed, Transaction,
    Transfer, TransferEvidence, TransferStatus, Vote, Withdrawal,
};
