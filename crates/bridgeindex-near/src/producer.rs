//! NEAR producer: walks final blocks and publishes bridge withdrawals.
//!
//! Each iteration scans at most `batch_size` heights starting at the cursor.
//! The cursor always holds the next height to scan and moves one block at a
//! time, after that block's withdrawals have been published.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use bridgeindex_bus::Publish;
use bridgeindex_core::message::{to_envelopes, WithdrawalEvent, WithdrawalMessage};
use bridgeindex_core::{CursorManager, IndexerError, Producer};

use crate::events::parse_withdrawals;
use crate::rpc::{NearBlock, NearRpcClient};

/// Static settings for the NEAR scanner.
#[derive(Debug, Clone)]
pub struct NearChain {
    pub name: String,
    pub bridge_contract: String,
    pub batch_size: u64,
}

pub struct NearProducer {
    chain: NearChain,
    client: Arc<dyn NearRpcClient>,
    cursor: CursorManager,
    publisher: Arc<dyn Publish>,
}

impl NearProducer {
    pub fn new(
        chain: NearChain,
        client: Arc<dyn NearRpcClient>,
        cursor: CursorManager,
        publisher: Arc<dyn Publish>,
    ) -> Self {
        Self {
            chain,
            client,
            cursor,
            publisher,
        }
    }

    /// Collect the bridge withdrawals of one block, in chunk and receipt order.
    async fn scan_block(&self, block: &NearBlock) -> Result<Vec<WithdrawalMessage>, IndexerError> {
        let height = block.header.height;
        let mut found = Vec::new();

        for chunk_header in &block.chunks {
            let chunk = self.client.chunk(&chunk_header.chunk_hash).await?;
            for tx in &chunk.transactions {
                let status = self.client.tx_status(&tx.hash, &tx.signer_id).await?;
                for receipt in &status.receipts_outcome {
                    let outcome = &receipt.outcome;
                    if outcome.executor_id != self.chain.bridge_contract {
                        continue;
                    }
                    for log in &outcome.logs {
                        for w in parse_withdrawals(log) {
                            tracing::debug!(
                                chain = %self.chain.name,
                                kind = ?w.kind,
                                origin = %w.origin,
                                tx = %tx.hash,
                                height,
                                "Withdrawal found"
                            );
                            found.push(WithdrawalMessage::Withdrawal(WithdrawalEvent {
                                origin: w.origin,
                                hash: tx.hash.clone(),
                                success: outcome.succeeded(),
                                block_height: Some(height),
                            }));
                        }
                    }
                }
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl Producer for NearProducer {
    fn name(&self) -> &str {
        &self.chain.name
    }

    async fn run(&self, shutdown: &CancellationToken) -> Result<(), IndexerError> {
        let start = self.cursor.load_height().await?;
        let head = self.client.final_height().await?;
        if start > head {
            return Ok(());
        }
        let end = start.saturating_add(self.chain.batch_size.max(1) - 1).min(head);

        for height in start..=end {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            let Some(block) = self.client.block(height).await? else {
                tracing::debug!(chain = %self.chain.name, height, "Height skipped by the chain");
                self.cursor.advance(height + 1).await;
                continue;
            };

            let msgs = self.scan_block(&block).await?;
            if !msgs.is_empty() {
                self.publisher.publish_msgs(&to_envelopes(&msgs)?).await?;
                tracing::info!(chain = %self.chain.name, height, count = msgs.len(), "Withdrawals published");
            }
            self.cursor.advance(height + 1).await;
        }

        tracing::debug!(chain = %self.chain.name, range_start = start, range_end = end, "Scanned NEAR blocks");
        Ok(())
    }
}
