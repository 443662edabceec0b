//! bridgeindex-indexer: folds bus messages into the relational aggregate.
//!
//! | handler | queue(s) | writes |
//! |---|---|---|
//! | [`TransferIndexer`] | transfers | `Transfer` rows |
//! | [`EvidenceIndexer`] | confirmations, approvals, rejections, votes | audit rows + transfer status |
//! | [`WithdrawalIndexer`] | withdrawals | `Withdrawal` rows |
//! | [`CollectionIndexer`] | collections | collections and their per-chain data |
//! | [`ItemIndexer`] | items | items, chain mappings, seeds |
//!
//! Transfer status is always derived by [`recompute`] from the evidence
//! present at write time.

pub mod collections;
pub mod evidence;
pub mod items;
pub mod status;
pub mod transfers;
pub mod withdrawals;

#[cfg(test)]
pub(crate) mod testing;

pub use collections::CollectionIndexer;
pub use evidence::EvidenceIndexer;
pub use items::ItemIndexer;
pub use status::recompute;
pub use transfers::TransferIndexer;
pub use withdrawals::WithdrawalIndexer;
