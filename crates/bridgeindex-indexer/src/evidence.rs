//! Evidence indexer: confirmations, approvals, rejections and votes.
//!
//! Audit rows are append-only and keyed by their source transaction, so a
//! redelivered batch inserts nothing new. Approvals, rejections and
//! confirmations move the status of every transfer they touch inside the
//! same storage transaction that records them, under the per-transfer lock
//! the transfer indexer also takes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use bridgeindex_bus::BatchHandler;
use bridgeindex_core::message::{decode_batch, Envelope, OperationMessage};
use bridgeindex_core::IndexerError;
use bridgeindex_cosmos::CoreQuery;
use bridgeindex_storage::{Approval, Confirmation, Rejection, Storage, StorageTx, TransferStatus, Vote};

use crate::status::recompute;

#[derive(Default)]
struct EvidenceRows {
    confirmations: Vec<Confirmation>,
    approvals: Vec<Approval>,
    rejections: Vec<Rejection>,
    votes: Vec<Vote>,
}

impl EvidenceRows {
    fn is_empty(&self) -> bool {
        self.confirmations.is_empty() && self.approvals.is_empty() && self.rejections.is_empty() && self.votes.is_empty()
    }

    /// Transfers whose status may change.
    fn affected(&self) -> BTreeSet<String> {
        self.confirmations
            .iter()
            .map(|r| r.transfer_index.clone())
            .chain(self.approvals.iter().map(|r| r.transfer_index.clone()))
            .chain(self.rejections.iter().map(|r| r.transfer_index.clone()))
            .collect()
    }
}

pub struct EvidenceIndexer {
    name: String,
    query: Arc<dyn CoreQuery>,
    storage: Arc<dyn Storage>,
}

impl EvidenceIndexer {
    /// `name` identifies the queue this instance consumes in logs.
    pub fn new(name: impl Into<String>, query: Arc<dyn CoreQuery>, storage: Arc<dyn Storage>) -> Self {
        Self {
            name: name.into(),
            query,
            storage,
        }
    }

    async fn collect(&self, msgs: Vec<OperationMessage>) -> Result<EvidenceRows, IndexerError> {
        let mut rows = EvidenceRows::default();
        for msg in msgs {
            match msg {
                OperationMessage::ConfirmationOp(c) => {
                    let Some(confirmation) = self.query.confirmation(&c.confirmation_id).await? else {
                        tracing::warn!(handler = %self.name, root = %c.confirmation_id, "Confirmation not found, skipping");
                        continue;
                    };
                    rows.confirmations.extend(confirmation.indexes.into_iter().map(|index| Confirmation {
                        transfer_index: index,
                        root: confirmation.root.clone(),
                        source_tx_hash: c.tx.tx_hash.clone(),
                        created_at: c.tx.block_time,
                    }));
                }
                OperationMessage::ApprovalOp(r) => rows.approvals.push(Approval {
                    transfer_index: r.operation_id,
                    source_tx_hash: r.tx.tx_hash,
                    created_at: r.tx.block_time,
                }),
                OperationMessage::RejectionOp(r) => rows.rejections.push(Rejection {
                    transfer_index: r.operation_id,
                    source_tx_hash: r.tx.tx_hash,
                    created_at: r.tx.block_time,
                }),
                OperationMessage::VoteOp(v) => rows.votes.push(Vote {
                    transfer_index: v.operation_id,
                    choice: v.choice,
                    source_tx_hash: v.tx.tx_hash,
                    created_at: v.tx.block_time,
                }),
                OperationMessage::TransferOp(r) => {
                    tracing::warn!(handler = %self.name, operation = %r.operation_id, "Unexpected transfer message, skipping")
                }
            }
        }
        Ok(rows)
    }

    /// Recompute and write the status of each affected transfer.
    async fn update_statuses(&self, tx: &mut dyn StorageTx, affected: BTreeSet<String>) -> Result<u64, IndexerError> {
        let mut by_status: BTreeMap<TransferStatus, Vec<String>> = BTreeMap::new();
        for index in affected {
            let evidence = tx.transfer_evidence(&index).await?;
            // Every affected transfer has evidence, so the fallback is never chosen
            let status = recompute(&evidence, TransferStatus::Initialized);
            by_status.entry(status).or_default().push(index);
        }
        let mut touched = 0;
        for (status, indexes) in by_status {
            touched += tx.set_status_by_indexes(&indexes, status).await?;
        }
        Ok(touched)
    }
}

#[async_trait]
impl BatchHandler for EvidenceIndexer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, batch: &[Envelope]) -> Result<(), IndexerError> {
        let rows = self.collect(decode_batch::<OperationMessage>(&self.name, batch)).await?;
        if rows.is_empty() {
            return Ok(());
        }

        let affected = rows.affected();
        let mut tx = self.storage.begin().await?;
        tx.lock_transfers(&affected.iter().cloned().collect::<Vec<_>>()).await?;
        let confirmations = tx.insert_confirmations(&rows.confirmations).await?;
        let approvals = tx.insert_approvals(&rows.approvals).await?;
        let rejections = tx.insert_rejections(&rows.rejections).await?;
        let votes = tx.insert_votes(&rows.votes).await?;
        let touched = self.update_statuses(tx.as_mut(), affected).await?;
        tx.commit().await?;

        tracing::info!(
            handler = %self.name,
            confirmations,
            approvals,
            rejections,
            votes,
            statuses = touched,
            "Evidence indexed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{envelopes, tx, MockCore};
    use crate::transfers::TransferIndexer;
    use bridgeindex_core::message::{ConfirmationRef, OperationRef, VoteRef};
    use bridgeindex_core::VoteChoice;
    use bridgeindex_storage::InMemoryStorage;

    fn approval(op: &str, hash: &str, secs: i64) -> OperationMessage {
        OperationMessage::ApprovalOp(OperationRef {
            operation_id: op.into(),
            tx: tx(hash, secs),
        })
    }

    fn rejection(op: &str, hash: &str, secs: i64) -> OperationMessage {
        OperationMessage::RejectionOp(OperationRef {
            operation_id: op.into(),
            tx: tx(hash, secs),
        })
    }

    fn confirmation(root: &str, hash: &str, secs: i64) -> OperationMessage {
        OperationMessage::ConfirmationOp(ConfirmationRef {
            confirmation_id: root.into(),
            tx: tx(hash, secs),
        })
    }

    fn transfer(op: &str) -> OperationMessage {
        OperationMessage::TransferOp(OperationRef {
            operation_id: op.into(),
            tx: tx("CREATE", 1),
        })
    }

    struct Fixture {
        core: Arc<MockCore>,
        storage: InMemoryStorage,
        evidence: EvidenceIndexer,
        transfers: TransferIndexer,
    }

    fn fixture() -> Fixture {
        let core = Arc::new(MockCore::default());
        let storage = InMemoryStorage::new();
        Fixture {
            evidence: EvidenceIndexer::new("evidence", core.clone(), Arc::new(storage.clone())),
            transfers: TransferIndexer::new(core.clone(), Arc::new(storage.clone())),
            core,
            storage,
        }
    }

    async fn status(storage: &InMemoryStorage, index: &str) -> TransferStatus {
        storage.transfer_by_index(index).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn approval_then_later_rejection() {
        let f = fixture();
        f.core.add_transfer("op-1", "INITIALIZED");
        f.transfers.handle(&envelopes(&[transfer("op-1")])).await.unwrap();

        f.evidence.handle(&envelopes(&[approval("op-1", "A", 10)])).await.unwrap();
        assert_eq!(status(&f.storage, "op-1").await, TransferStatus::Approved);

        f.evidence.handle(&envelopes(&[rejection("op-1", "R", 20)])).await.unwrap();
        assert_eq!(status(&f.storage, "op-1").await, TransferStatus::NotApproved);
    }

    #[tokio::test]
    async fn confirmation_signs_every_covered_transfer() {
        let f = fixture();
        f.core.add_transfer("op-1", "INITIALIZED");
        f.core.add_transfer("op-2", "INITIALIZED");
        f.core.add_confirmation("root-1", &["op-1", "op-2", "not-a-transfer"]);
        f.transfers
            .handle(&envelopes(&[transfer("op-1"), transfer("op-2")]))
            .await
            .unwrap();

        f.evidence
            .handle(&envelopes(&[rejection("op-1", "R", 30), confirmation("root-1", "C", 20)]))
            .await
            .unwrap();

        assert_eq!(status(&f.storage, "op-1").await, TransferStatus::Signed);
        assert_eq!(status(&f.storage, "op-2").await, TransferStatus::Signed);
        assert_eq!(f.storage.confirmations_by_transfer("op-2").await.unwrap()[0].root, "root-1");
    }

    #[tokio::test]
    async fn redelivered_evidence_adds_no_rows() {
        let f = fixture();
        let vote = OperationMessage::VoteOp(VoteRef {
            operation_id: "op-1".into(),
            choice: VoteChoice::No,
            tx: tx("V", 3),
        });
        let batch = envelopes(&[approval("op-1", "A", 10), vote]);

        f.evidence.handle(&batch).await.unwrap();
        f.evidence.handle(&batch).await.unwrap();

        assert_eq!(f.storage.approvals_by_transfer("op-1").await.unwrap().len(), 1);
        let votes = f.storage.votes_by_transfer("op-1").await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].choice, VoteChoice::No);
    }

    #[tokio::test]
    async fn status_converges_regardless_of_arrival_order() {
        // Evidence first, transfer second
        let early = fixture();
        early.core.add_transfer("op-1", "INITIALIZED");
        early
            .evidence
            .handle(&envelopes(&[approval("op-1", "A", 10), rejection("op-1", "R", 10)]))
            .await
            .unwrap();
        early.transfers.handle(&envelopes(&[transfer("op-1")])).await.unwrap();

        // Transfer first, evidence one message at a time in reverse order
        let late = fixture();
        late.core.add_transfer("op-1", "INITIALIZED");
        late.transfers.handle(&envelopes(&[transfer("op-1")])).await.unwrap();
        late.evidence.handle(&envelopes(&[rejection("op-1", "R", 10)])).await.unwrap();
        late.evidence.handle(&envelopes(&[approval("op-1", "A", 10)])).await.unwrap();

        assert_eq!(status(&early.storage, "op-1").await, TransferStatus::NotApproved);
        assert_eq!(status(&late.storage, "op-1").await, TransferStatus::NotApproved);
    }

    #[tokio::test]
    async fn missing_confirmation_is_skipped() {
        let f = fixture();
        f.evidence
            .handle(&envelopes(&[confirmation("unknown-root", "C", 1)]))
            .await
            .unwrap();
        assert!(f.storage.confirmations_by_transfer("op-1").await.unwrap().is_empty());
    }
}
