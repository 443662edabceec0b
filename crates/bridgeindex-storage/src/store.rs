//! The `Storage` contract consumed by the indexers.

use async_trait::async_trait;

use bridgeindex_core::IndexerError;

use crate::types::{
    Approval, Collection, CollectionData, Confirmation, Item, ItemChainMapping, Rejection, Seed, Transaction,
    Transfer, TransferEvidence, TransferStatus, Vote, Withdrawal,
};

/// Read access plus the entry point for scoped write transactions.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Open a write transaction. Dropping it without [`StorageTx::commit`]
    /// discards every write made through it.
    async fn begin(&self) -> Result<Box<dyn StorageTx>, IndexerError>;

    async fn transfer_by_index(&self, index: &str) -> Result<Option<Transfer>, IndexerError>;

    async fn confirmations_by_transfer(&self, index: &str) -> Result<Vec<Confirmation>, IndexerError>;

    async fn approvals_by_transfer(&self, index: &str) -> Result<Vec<Approval>, IndexerError>;

    async fn rejections_by_transfer(&self, index: &str) -> Result<Vec<Rejection>, IndexerError>;

    async fn votes_by_transfer(&self, index: &str) -> Result<Vec<Vote>, IndexerError>;

    async fn withdrawal_by_origin(&self, origin: &str) -> Result<Option<Withdrawal>, IndexerError>;

    async fn collection_by_index(&self, index: &str) -> Result<Option<Collection>, IndexerError>;

    async fn collection_data(&self, chain: &str, address: &str) -> Result<Option<CollectionData>, IndexerError>;

    async fn item_by_index(&self, index: &str) -> Result<Option<Item>, IndexerError>;

    async fn item_mapping(&self, item_index: &str, chain: &str) -> Result<Option<ItemChainMapping>, IndexerError>;

    async fn seed(&self, seed: &str) -> Result<Option<Seed>, IndexerError>;
}

/// Writes applied atomically on [`commit`](StorageTx::commit).
///
/// Insert methods return the number of rows actually written; rows whose key
/// already exists are ignored. Delete methods return whether a row existed.
#[async_trait]
pub trait StorageTx: Send {
    async fn upsert_transfers(&mut self, transfers: &[Transfer]) -> Result<(), IndexerError>;

    /// Hold an exclusive per-transfer lock on each index until the transaction
    /// ends. Callers recomputing a status take it before reading evidence, so
    /// two transactions never derive a status from each other's stale view.
    async fn lock_transfers(&mut self, indexes: &[String]) -> Result<(), IndexerError>;

    /// Set `status` on every listed transfer that exists. Returns rows touched.
    async fn set_status_by_indexes(&mut self, indexes: &[String], status: TransferStatus)
        -> Result<u64, IndexerError>;

    /// Evidence for `index`, including rows written earlier in this transaction.
    async fn transfer_evidence(&mut self, index: &str) -> Result<TransferEvidence, IndexerError>;

    async fn insert_confirmations(&mut self, rows: &[Confirmation]) -> Result<u64, IndexerError>;

    async fn insert_approvals(&mut self, rows: &[Approval]) -> Result<u64, IndexerError>;

    async fn insert_rejections(&mut self, rows: &[Rejection]) -> Result<u64, IndexerError>;

    async fn insert_votes(&mut self, rows: &[Vote]) -> Result<u64, IndexerError>;

    async fn insert_withdrawals(&mut self, rows: &[Withdrawal]) -> Result<u64, IndexerError>;

    async fn insert_transactions(&mut self, rows: &[Transaction]) -> Result<u64, IndexerError>;

    async fn upsert_collection(&mut self, collection: &Collection) -> Result<(), IndexerError>;

    /// Delete a collection together with its per-chain data.
    async fn delete_collection(&mut self, index: &str) -> Result<bool, IndexerError>;

    async fn collection_exists(&mut self, index: &str) -> Result<bool, IndexerError>;

    async fn upsert_collection_data(&mut self, data: &CollectionData) -> Result<(), IndexerError>;

    async fn delete_collection_data(&mut self, chain: &str, address: &str) -> Result<bool, IndexerError>;

    async fn upsert_item(&mut self, item: &Item) -> Result<(), IndexerError>;

    /// Delete an item together with its chain mappings and seeds.
    async fn delete_item(&mut self, index: &str) -> Result<bool, IndexerError>;

    async fn item_exists(&mut self, index: &str) -> Result<bool, IndexerError>;

    async fn upsert_item_mapping(&mut self, mapping: &ItemChainMapping) -> Result<(), IndexerError>;

    async fn delete_item_mapping(&mut self, item_index: &str, chain: &str) -> Result<bool, IndexerError>;

    async fn upsert_seed(&mut self, seed: &Seed) -> Result<(), IndexerError>;

    async fn delete_seed(&mut self, seed: &str) -> Result<bool, IndexerError>;

    async fn commit(self: Box<Self>) -> Result<(), IndexerError>;
}
