//! bridgeindex-cosmos: core-chain ingestion.
//!
//! # Architecture
//!
//! ```text
//! BlockRangeProducer ── cursor core_blocks ──► [block_range]
//!                                                   │
//!                      ┌────────────────────────────┴───────────────┐
//!                      ▼                                            ▼
//!        BridgeOperationProducer                         TokenManagerProducer
//!        cursor <base>_<start>_<end>                     cursors <base>_<start>_<end>_{blocks,txs}
//!        tx_search pages ─► new_operation,               block_results + tx_search pages
//!        new_confirmation, vote, approved, rejected      ─► collection / item / seed events
//!                      │                                            │
//!        [transfer_op] [confirmation_op] [vote_op]        [collections] [items]
//!        [approval_op] [rejection_op]
//! ```
//!
//! State referenced by the events is read back through [`CoreQuery`].

pub mod block_range;
pub mod bridge_producer;
pub mod events;
pub mod pages;
pub mod query;
pub mod rpc;
pub mod token_producer;

#[cfg(test)]
pub(crate) mod testing;

pub use block_range::BlockRangeProducer;
pub use bridge_producer::{BridgeOperationProducer, OperationQueues};
pub use events::{require_attribute, OperationBatches, TokenBatches};
pub use query::{
    CoreCollection, CoreCollectionData, CoreConfirmation, CoreItem, CoreOperation, CoreQuery, CoreSeed, CoreTransfer,
    OnChainRef, RestCoreQuery,
};
pub use rpc::{AbciEvent, BlockResults, HttpTendermintClient, TendermintClient, TxResponse};
pub use token_producer::TokenManagerProducer;
