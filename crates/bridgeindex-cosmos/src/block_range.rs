//! Splits the core chain into bounded block ranges for the operation producers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use bridgeindex_bus::Publish;
use bridgeindex_core::message::{to_envelopes, BlockRange, RangeMessage};
use bridgeindex_core::{CursorManager, IndexerError, Producer};

use crate::rpc::TendermintClient;

pub struct BlockRangeProducer {
    client: Arc<dyn TendermintClient>,
    cursor: CursorManager,
    publisher: Arc<dyn Publish>,
    range_limit: i64,
}

impl BlockRangeProducer {
    /// `cursor` holds the next unprocessed height.
    pub fn new(
        client: Arc<dyn TendermintClient>,
        cursor: CursorManager,
        publisher: Arc<dyn Publish>,
        range_limit: u64,
    ) -> Self {
        Self {
            client,
            cursor,
            publisher,
            range_limit: i64::try_from(range_limit).unwrap_or(i64::MAX),
        }
    }

    /// Publish the next range, if there is one.
    pub async fn run_once(&self) -> Result<Option<BlockRange>, IndexerError> {
        let start = i64::try_from(self.cursor.load_height().await?)
            .map_err(|e| IndexerError::Decode(format!("cursor {} out of range: {e}", self.cursor.key())))?;
        let Some(height) = self.client.latest_height().await? else {
            tracing::debug!(cursor = %self.cursor.key(), "Chain height unavailable");
            return Ok(None);
        };

        let end = start.saturating_add(self.range_limit).min(height);
        if start > end {
            return Ok(None);
        }

        let range = BlockRange { start, end };
        self.publisher
            .publish_msgs(&to_envelopes(&[RangeMessage::BlockRange(range)])?)
            .await?;
        self.cursor.advance(end + 1).await;
        tracing::info!(range_start = start, range_end = end, "Block range published");
        Ok(Some(range))
    }

    /// Publish operator-specified historical ranges. The cursor is untouched.
    pub async fn backfill(&self, ranges: &[BlockRange]) -> Result<(), IndexerError> {
        let msgs: Vec<RangeMessage> = ranges
            .iter()
            .filter(|r| r.start <= r.end)
            .copied()
            .map(RangeMessage::BlockRange)
            .collect();
        if msgs.len() != ranges.len() {
            tracing::warn!(skipped = ranges.len() - msgs.len(), "Ignoring inverted backfill ranges");
        }
        self.publisher.publish_msgs(&to_envelopes(&msgs)?).await?;
        tracing::info!(count = msgs.len(), "Backfill ranges published");
        Ok(())
    }
}

#[async_trait]
impl Producer for BlockRangeProducer {
    fn name(&self) -> &str {
        "core-block-ranges"
    }

    async fn run(&self, _shutdown: &CancellationToken) -> Result<(), IndexerError> {
        self.run_once().await.map(|_| ())
    }
}
