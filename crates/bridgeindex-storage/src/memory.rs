//! In-memory storage backend.
//!
//! Keeps every table in RAM behind one async mutex. A transaction holds the
//! lock for its lifetime and works on a copy, so writes become visible only
//! on commit and concurrent transactions are serialized.
//! Useful for testing and short-lived runs that don't need persistence.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use bridgeindex_core::IndexerError;

use crate::store::{Storage, StorageTx};
use crate::types::{
    Approval, Collection, CollectionData, Confirmation, Item, ItemChainMapping, Rejection, Seed, Transaction,
    Transfer, TransferEvidence, TransferStatus, Vote, Withdrawal,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    transfers: BTreeMap<String, Transfer>,
    confirmations: Vec<Confirmation>,
    approvals: Vec<Approval>,
    rejections: Vec<Rejection>,
    votes: Vec<Vote>,
    withdrawals: BTreeMap<String, Withdrawal>,
    transactions: BTreeMap<String, Transaction>,
    collections: BTreeMap<String, Collection>,
    collection_data: BTreeMap<(String, String), CollectionData>,
    items: BTreeMap<String, Item>,
    item_mappings: BTreeMap<(String, String), ItemChainMapping>,
    seeds: BTreeMap<String, Seed>,
}

/// In-memory storage. All data is lost when the process exits.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn transfer_count(&self) -> usize {
        self.tables.lock().await.transfers.len()
    }

    pub async fn withdrawal_count(&self) -> usize {
        self.tables.lock().await.withdrawals.len()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.tables.lock().await.transactions.values().cloned().collect()
    }

    pub async fn item_mappings(&self, item_index: &str) -> Vec<ItemChainMapping> {
        self.tables
            .lock()
            .await
            .item_mappings
            .values()
            .filter(|m| m.item_index == item_index)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTx>, IndexerError> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(InMemoryTx { guard, work }))
    }

    async fn transfer_by_index(&self, index: &str) -> Result<Option<Transfer>, IndexerError> {
        Ok(self.tables.lock().await.transfers.get(index).cloned())
    }

    async fn confirmations_by_transfer(&self, index: &str) -> Result<Vec<Confirmation>, IndexerError> {
        let tables = self.tables.lock().await;
        Ok(tables.confirmations.iter().filter(|r| r.transfer_index == index).cloned().collect())
    }

    async fn approvals_by_transfer(&self, index: &str) -> Result<Vec<Approval>, IndexerError> {
        let tables = self.tables.lock().await;
        Ok(tables.approvals.iter().filter(|r| r.transfer_index == index).cloned().collect())
    }

    async fn rejections_by_transfer(&self, index: &str) -> Result<Vec<Rejection>, IndexerError> {
        let tables = self.tables.lock().await;
        Ok(tables.rejections.iter().filter(|r| r.transfer_index == index).cloned().collect())
    }

    async fn votes_by_transfer(&self, index: &str) -> Result<Vec<Vote>, IndexerError> {
        let tables = self.tables.lock().await;
        Ok(tables.votes.iter().filter(|r| r.transfer_index == index).cloned().collect())
    }

    async fn withdrawal_by_origin(&self, origin: &str) -> Result<Option<Withdrawal>, IndexerError> {
        Ok(self.tables.lock().await.withdrawals.get(origin).cloned())
    }

    async fn collection_by_index(&self, index: &str) -> Result<Option<Collection>, IndexerError> {
        Ok(self.tables.lock().await.collections.get(index).cloned())
    }

    async fn collection_data(&self, chain: &str, address: &str) -> Result<Option<CollectionData>, IndexerError> {
        let key = (chain.to_string(), address.to_string());
        Ok(self.tables.lock().await.collection_data.get(&key).cloned())
    }

    async fn item_by_index(&self, index: &str) -> Result<Option<Item>, IndexerError> {
        Ok(self.tables.lock().await.items.get(index).cloned())
    }

    async fn item_mapping(&self, item_index: &str, chain: &str) -> Result<Option<ItemChainMapping>, IndexerError> {
        let key = (item_index.to_string(), chain.to_string());
        Ok(self.tables.lock().await.item_mappings.get(&key).cloned())
    }

    async fn seed(&self, seed: &str) -> Result<Option<Seed>, IndexerError> {
        Ok(self.tables.lock().await.seeds.get(seed).cloned())
    }
}

/// Transaction over [`InMemoryStorage`].
pub struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

fn insert_unique<T: Clone, K: PartialEq>(table: &mut Vec<T>, rows: &[T], key: impl Fn(&T) -> K) -> u64 {
    let mut inserted = 0;
    for row in rows {
        let k = key(row);
        if !table.iter().any(|existing| key(existing) == k) {
            table.push(row.clone());
            inserted += 1;
        }
    }
    inserted
}

#[async_trait]
impl StorageTx for InMemoryTx {
    async fn upsert_transfers(&mut self, transfers: &[Transfer]) -> Result<(), IndexerError> {
        for t in transfers {
            let mut row = t.clone();
            if let Some(existing) = self.work.transfers.get(&t.index) {
                row.created_at = existing.created_at;
            }
            self.work.transfers.insert(t.index.clone(), row);
        }
        Ok(())
    }

    async fn lock_transfers(&mut self, _indexes: &[String]) -> Result<(), IndexerError> {
        // The transaction already holds the whole store
        Ok(())
    }

    async fn set_status_by_indexes(
        &mut self,
        indexes: &[String],
        status: TransferStatus,
    ) -> Result<u64, IndexerError> {
        let mut touched = 0;
        let now = chrono::Utc::now();
        for index in indexes {
            if let Some(t) = self.work.transfers.get_mut(index) {
                t.status = status;
                t.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn transfer_evidence(&mut self, index: &str) -> Result<TransferEvidence, IndexerError> {
        Ok(TransferEvidence {
            has_confirmation: self.work.confirmations.iter().any(|r| r.transfer_index == index),
            latest_approval: self
                .work
                .approvals
                .iter()
                .filter(|r| r.transfer_index == index)
                .map(|r| r.created_at)
                .max(),
            latest_rejection: self
                .work
                .rejections
                .iter()
                .filter(|r| r.transfer_index == index)
                .map(|r| r.created_at)
                .max(),
        })
    }

    async fn insert_confirmations(&mut self, rows: &[Confirmation]) -> Result<u64, IndexerError> {
        Ok(insert_unique(&mut self.work.confirmations, rows, |r| {
            (r.transfer_index.clone(), r.source_tx_hash.clone(), r.root.clone())
        }))
    }

    async fn insert_approvals(&mut self, rows: &[Approval]) -> Result<u64, IndexerError> {
        Ok(insert_unique(&mut self.work.approvals, rows, |r| {
            (r.transfer_index.clone(), r.source_tx_hash.clone())
        }))
    }

    async fn insert_rejections(&mut self, rows: &[Rejection]) -> Result<u64, IndexerError> {
        Ok(insert_unique(&mut self.work.rejections, rows, |r| {
            (r.transfer_index.clone(), r.source_tx_hash.clone())
        }))
    }

    async fn insert_votes(&mut self, rows: &[Vote]) -> Result<u64, IndexerError> {
        Ok(insert_unique(&mut self.work.votes, rows, |r| {
            (r.transfer_index.clone(), r.source_tx_hash.clone())
        }))
    }

    async fn insert_withdrawals(&mut self, rows: &[Withdrawal]) -> Result<u64, IndexerError> {
        let mut inserted = 0;
        for row in rows {
            if !self.work.withdrawals.contains_key(&row.origin) {
                self.work.withdrawals.insert(row.origin.clone(), row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn insert_transactions(&mut self, rows: &[Transaction]) -> Result<u64, IndexerError> {
        let mut inserted = 0;
        for row in rows {
            if !self.work.transactions.contains_key(&row.hash) {
                self.work.transactions.insert(row.hash.clone(), row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert_collection(&mut self, collection: &Collection) -> Result<(), IndexerError> {
        self.work.collections.insert(collection.index.clone(), collection.clone());
        Ok(())
    }

    async fn delete_collection(&mut self, index: &str) -> Result<bool, IndexerError> {
        self.work.collection_data.retain(|_, d| d.collection_index != index);
        Ok(self.work.collections.remove(index).is_some())
    }

    async fn collection_exists(&mut self, index: &str) -> Result<bool, IndexerError> {
        Ok(self.work.collections.contains_key(index))
    }

    async fn upsert_collection_data(&mut self, data: &CollectionData) -> Result<(), IndexerError> {
        self.work
            .collection_data
            .insert((data.chain.clone(), data.address.clone()), data.clone());
        Ok(())
    }

    async fn delete_collection_data(&mut self, chain: &str, address: &str) -> Result<bool, IndexerError> {
        Ok(self
            .work
            .collection_data
            .remove(&(chain.to_string(), address.to_string()))
            .is_some())
    }

    async fn upsert_item(&mut self, item: &Item) -> Result<(), IndexerError> {
        self.work.items.insert(item.index.clone(), item.clone());
        Ok(())
    }

    async fn delete_item(&mut self, index: &str) -> Result<bool, IndexerError> {
        self.work.item_mappings.retain(|_, m| m.item_index != index);
        self.work.seeds.retain(|_, s| s.item_index != index);
        Ok(self.work.items.remove(index).is_some())
    }

    async fn item_exists(&mut self, index: &str) -> Result<bool, IndexerError> {
        Ok(self.work.items.contains_key(index))
    }

    async fn upsert_item_mapping(&mut self, mapping: &ItemChainMapping) -> Result<(), IndexerError> {
        self.work
            .item_mappings
            .insert((mapping.item_index.clone(), mapping.chain.clone()), mapping.clone());
        Ok(())
    }

    async fn delete_item_mapping(&mut self, item_index: &str, chain: &str) -> Result<bool, IndexerError> {
        Ok(self
            .work
            .item_mappings
            .remove(&(item_index.to_string(), chain.to_string()))
            .is_some())
    }

    async fn upsert_seed(&mut self, seed: &Seed) -> Result<(), IndexerError> {
        self.work.seeds.insert(seed.seed.clone(), seed.clone());
        Ok(())
    }

    async fn delete_seed(&mut self, seed: &str) -> Result<bool, IndexerError> {
        Ok(self.work.seeds.remove(seed).is_some())
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexerError> {
        let InMemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
