//! Transfer-created indexer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use bridgeindex_bus::BatchHandler;
use bridgeindex_core::message::{decode_batch, Envelope, OperationMessage, OperationRef};
use bridgeindex_core::IndexerError;
use bridgeindex_cosmos::CoreQuery;
use bridgeindex_storage::{Storage, Transfer, TransferStatus};

use crate::status::recompute;

/// Builds `Transfer` rows from the operations the core chain reports.
pub struct TransferIndexer {
    query: Arc<dyn CoreQuery>,
    storage: Arc<dyn Storage>,
}

impl TransferIndexer {
    pub fn new(query: Arc<dyn CoreQuery>, storage: Arc<dyn Storage>) -> Self {
        Self { query, storage }
    }

    /// Fetch everything a `Transfer` row needs. `None` when the operation is
    /// not a transfer the core chain knows about.
    async fn build(&self, op_ref: &OperationRef) -> Result<Option<(Transfer, TransferStatus)>, IndexerError> {
        let Some(op) = self.query.operation(&op_ref.operation_id).await? else {
            tracing::warn!(handler = self.name(), operation = %op_ref.operation_id, "Operation not found, skipping");
            return Ok(None);
        };
        let Some(details) = op.transfer else {
            tracing::warn!(
                handler = self.name(),
                operation = %op.index,
                kind = %op.operation_type,
                "Operation carries no transfer details, skipping"
            );
            return Ok(None);
        };

        let core_status = op.status.parse::<TransferStatus>().unwrap_or_else(|e| {
            tracing::warn!(handler = self.name(), operation = %op.index, error = %e, "Unknown core status");
            TransferStatus::Initialized
        });
        let token_index = self.query.on_chain_item(&details.from).await?.unwrap_or_default();

        let now = Utc::now();
        let transfer = Transfer {
            index: op.index,
            status: core_status,
            from_chain: details.from.chain,
            to_chain: details.to.chain,
            amount: details.amount,
            receiver: details.receiver,
            creator: op.creator,
            bundle_data: details.bundle_data,
            bundle_salt: details.bundle_salt,
            origin: details.origin,
            event_id: details.event_id,
            tx_hash: details.tx,
            rarimo_tx_hash: op_ref.tx.tx_hash.clone(),
            token_index,
            created_at: op_ref.tx.block_time,
            updated_at: now,
        };
        Ok(Some((transfer, core_status)))
    }
}

#[async_trait]
impl BatchHandler for TransferIndexer {
    fn name(&self) -> &str {
        "transfers"
    }

    async fn handle(&self, batch: &[Envelope]) -> Result<(), IndexerError> {
        let mut built = Vec::new();
        for msg in decode_batch::<OperationMessage>(self.name(), batch) {
            match msg {
                OperationMessage::TransferOp(op_ref) => {
                    if let Some(row) = self.build(&op_ref).await? {
                        built.push(row);
                    }
                }
                other => tracing::warn!(handler = self.name(), message = ?other, "Unexpected message, skipping"),
            }
        }
        if built.is_empty() {
            return Ok(());
        }

        let indexes: Vec<String> = built.iter().map(|(t, _)| t.index.clone()).collect();
        let mut tx = self.storage.begin().await?;
        tx.lock_transfers(&indexes).await?;
        let mut rows = Vec::with_capacity(built.len());
        for (mut transfer, core_status) in built {
            let evidence = tx.transfer_evidence(&transfer.index).await?;
            transfer.status = recompute(&evidence, core_status);
            rows.push(transfer);
        }
        tx.upsert_transfers(&rows).await?;
        tx.commit().await?;

        tracing::info!(handler = self.name(), count = rows.len(), "Transfers indexed");
        Ok(())
    }
}
