//! Withdrawal indexer: destination-chain settlements, written once per origin.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use bridgeindex_bus::BatchHandler;
use bridgeindex_core::message::{decode_batch, Envelope, WithdrawalMessage};
use bridgeindex_core::IndexerError;
use bridgeindex_storage::{Storage, Withdrawal};

pub struct WithdrawalIndexer {
    storage: Arc<dyn Storage>,
}

impl WithdrawalIndexer {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl BatchHandler for WithdrawalIndexer {
    fn name(&self) -> &str {
        "withdrawals"
    }

    async fn handle(&self, batch: &[Envelope]) -> Result<(), IndexerError> {
        let now = Utc::now();
        let rows: Vec<Withdrawal> = decode_batch::<WithdrawalMessage>(self.name(), batch)
            .into_iter()
            .map(|WithdrawalMessage::Withdrawal(w)| Withdrawal {
                origin: w.origin,
                hash: w.hash,
                success: w.success,
                block_height: w.block_height.and_then(|h| i64::try_from(h).ok()),
                created_at: now,
            })
            .collect();
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.storage.begin().await?;
        let inserted = tx.insert_withdrawals(&rows).await?;
        tx.commit().await?;

        tracing::info!(
            handler = self.name(),
            inserted,
            duplicates = rows.len() as u64 - inserted,
            "Withdrawals indexed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{envelopes, tx};
    use bridgeindex_core::message::{OperationMessage, OperationRef, WithdrawalEvent};
    use bridgeindex_storage::InMemoryStorage;

    fn withdrawal(origin: &str, hash: &str, success: bool) -> WithdrawalMessage {
        WithdrawalMessage::Withdrawal(WithdrawalEvent {
            origin: origin.into(),
            hash: hash.into(),
            success,
            block_height: Some(42),
        })
    }

    #[tokio::test]
    async fn first_withdrawal_per_origin_wins() {
        let storage = InMemoryStorage::new();
        let indexer = WithdrawalIndexer::new(Arc::new(storage.clone()));

        indexer
            .handle(&envelopes(&[withdrawal("0x01", "0xaa", true), withdrawal("0x02", "0xbb", false)]))
            .await
            .unwrap();
        // Replayed EVM block plus a conflicting report for the same origin
        indexer
            .handle(&envelopes(&[withdrawal("0x01", "0xaa", true), withdrawal("0x01", "0xcc", false)]))
            .await
            .unwrap();

        assert_eq!(storage.withdrawal_count().await, 2);
        let w = storage.withdrawal_by_origin("0x01").await.unwrap().unwrap();
        assert_eq!(w.hash, "0xaa");
        assert!(w.success);
        assert_eq!(w.block_height, Some(42));
    }

    #[tokio::test]
    async fn foreign_messages_are_ignored() {
        let storage = InMemoryStorage::new();
        let indexer = WithdrawalIndexer::new(Arc::new(storage.clone()));
        let foreign = OperationMessage::ApprovalOp(OperationRef {
            operation_id: "op-1".into(),
            tx: tx("A", 1),
        });
        indexer.handle(&envelopes(&[foreign])).await.unwrap();
        assert_eq!(storage.withdrawal_count().await, 0);
    }
}
