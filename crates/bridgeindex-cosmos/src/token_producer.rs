//! Token-manager producer: collection and item lifecycle events of a block range.
//!
//! Token-manager state changes surface in two places: governance proposals
//! applied at end-block, and regular transactions. A range is drained in that
//! order, each phase with its own cursor. Raw transactions of every page are
//! persisted once its messages are published, as the bridge producer does.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use bridgeindex_bus::{BatchHandler, Publish};
use bridgeindex_core::message::{decode_batch, to_envelopes, BlockRange, Envelope, RangeMessage, TxContext};
use bridgeindex_core::{cursor_key, CursorManager, CursorStore, IndexerError, InitialPosition};
use bridgeindex_storage::Storage;

use crate::events::{TokenBatches, TOKEN_EVENTS};
use crate::pages::{fetch_page, range_query, TimedTx};
use crate::rpc::{AbciEvent, TendermintClient};

pub struct TokenManagerProducer {
    client: Arc<dyn TendermintClient>,
    cursors: Arc<dyn CursorStore>,
    cursor_base: String,
    page_size: u32,
    collections: Arc<dyn Publish>,
    items: Arc<dyn Publish>,
    storage: Arc<dyn Storage>,
    shutdown: CancellationToken,
}

impl TokenManagerProducer {
    pub fn new(
        client: Arc<dyn TendermintClient>,
        cursors: Arc<dyn CursorStore>,
        cursor_base: impl Into<String>,
        page_size: u32,
        collections: Arc<dyn Publish>,
        items: Arc<dyn Publish>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            client,
            cursors,
            cursor_base: cursor_base.into(),
            page_size: page_size.max(1),
            collections,
            items,
            storage,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn cursor(&self, range: &BlockRange, phase: &str, initial: InitialPosition) -> CursorManager {
        let key = cursor_key(&[&self.cursor_base, &range.start.to_string(), &range.end.to_string(), phase]);
        CursorManager::new(self.cursors.clone(), key, &initial)
    }

    fn check_shutdown(&self, range: &BlockRange) -> Result<(), IndexerError> {
        if self.shutdown.is_cancelled() {
            return Err(IndexerError::Aborted {
                reason: format!("shutdown while processing range {range}"),
            });
        }
        Ok(())
    }

    pub async fn process_range(&self, range: BlockRange) -> Result<(), IndexerError> {
        let start = u64::try_from(range.start).unwrap_or(0);
        let blocks = self.cursor(&range, "blocks", InitialPosition::Height(start));
        let txs = self.cursor(&range, "txs", InitialPosition::Genesis);

        self.drain_blocks(&range, &blocks).await?;
        self.drain_txs(&range, &txs).await?;

        blocks.clear().await;
        txs.clear().await;
        tracing::info!(range_start = range.start, range_end = range.end, "Token-manager range drained");
        Ok(())
    }

    /// End-block events, one height at a time.
    async fn drain_blocks(&self, range: &BlockRange, cursor: &CursorManager) -> Result<(), IndexerError> {
        let mut height = i64::try_from(cursor.load_height().await?)
            .map_err(|e| IndexerError::Decode(format!("cursor {} out of range: {e}", cursor.key())))?;

        while height <= range.end {
            self.check_shutdown(range)?;
            let results = self.client.block_results(height).await?;
            let events: Vec<&AbciEvent> = results
                .block_events()
                .filter(|e| TOKEN_EVENTS.contains(&e.kind.as_str()))
                .collect();

            if !events.is_empty() {
                let ctx = TxContext {
                    tx_hash: String::new(),
                    block_height: height,
                    block_time: self.client.block_time(height).await?,
                };
                let mut batches = TokenBatches::default();
                batches.extend_from_events(events, &ctx);
                self.publish(&batches).await?;
                tracing::debug!(height, events = batches.collections.len() + batches.items.len(), "Block events published");
            }
            height += 1;
            cursor.advance(height).await;
        }
        Ok(())
    }

    /// Transaction events, one `tx_search` page at a time.
    async fn drain_txs(&self, range: &BlockRange, cursor: &CursorManager) -> Result<(), IndexerError> {
        let query = range_query(range);
        let mut page = cursor.load_height().await?;

        loop {
            self.check_shutdown(range)?;
            let txs = fetch_page(&*self.client, &query, page, self.page_size).await?;
            if txs.is_empty() {
                return Ok(());
            }
            let mut batches = TokenBatches::default();
            for tx in txs.iter().filter(|t| t.succeeded()) {
                batches.extend_from_events(&tx.tx.tx_result.events, &tx.context());
            }
            self.publish(&batches).await?;
            self.persist(&txs).await?;
            page += 1;
            cursor.advance(page).await;
        }
    }

    async fn publish(&self, batches: &TokenBatches) -> Result<(), IndexerError> {
        self.collections.publish_msgs(&to_envelopes(&batches.collections)?).await?;
        self.items.publish_msgs(&to_envelopes(&batches.items)?).await
    }

    async fn persist(&self, txs: &[TimedTx]) -> Result<(), IndexerError> {
        let rows: Vec<_> = txs.iter().map(TimedTx::to_row).collect();
        let mut tx = self.storage.begin().await?;
        tx.insert_transactions(&rows).await?;
        tx.commit().await
    }
}

#[async_trait]
impl BatchHandler for TokenManagerProducer {
    fn name(&self) -> &str {
        "token-manager"
    }

    async fn handle(&self, batch: &[Envelope]) -> Result<(), IndexerError> {
        for msg in decode_batch::<RangeMessage>(self.name(), batch) {
            let RangeMessage::BlockRange(range) = msg;
            self.process_range(range).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::*;
    use crate::testing::{event, MockTendermint};
    use bridgeindex_bus::{MemoryBroker, Publisher};
    use bridgeindex_core::message::{CollectionMessage, ItemMessage, MessageFamily};
    use bridgeindex_core::{MemoryCursorStore, RetryConfig};
    use bridgeindex_storage::InMemoryStorage;

    struct Fixture {
        mock: Arc<MockTendermint>,
        cursors: Arc<MemoryCursorStore>,
        broker: Arc<MemoryBroker>,
        storage: InMemoryStorage,
        producer: TokenManagerProducer,
    }

    fn setup() -> Fixture {
        let mock = Arc::new(MockTendermint::default());
        let cursors = Arc::new(MemoryCursorStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let storage = InMemoryStorage::new();
        let producer = TokenManagerProducer::new(
            mock.clone(),
            cursors.clone(),
            "core_tokens",
            10,
            Arc::new(Publisher::new(broker.queue("collections"), RetryConfig::default())),
            Arc::new(Publisher::new(broker.queue("items"), RetryConfig::default())),
            Arc::new(storage.clone()),
        );
        Fixture {
            mock,
            cursors,
            broker,
            storage,
            producer,
        }
    }

    fn decode<M: MessageFamily>(broker: &MemoryBroker, queue: &str) -> Vec<M> {
        broker
            .queue(queue)
            .ready_bodies()
            .iter()
            .map(|b| M::from_envelope(&Envelope::from_bytes(b).unwrap()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn block_events_then_tx_events() {
        let Fixture {
            mock,
            cursors,
            broker,
            storage,
            producer,
        } = setup();
        mock.add_block_events(
            3,
            vec![
                event(EVENT_NEW_COLLECTION, &[(ATTR_COLLECTION_INDEX, "c1")]),
                event("transfer", &[]),
            ],
        );
        mock.add_tx(
            4,
            "TX",
            vec![
                event(EVENT_NEW_ITEM, &[(ATTR_ITEM_INDEX, "i1")]),
                event(EVENT_SEED_CREATED, &[(ATTR_SEED, "s1"), (ATTR_ITEM_INDEX, "i1")]),
            ],
        );

        producer.process_range(BlockRange { start: 1, end: 5 }).await.unwrap();

        let collections: Vec<CollectionMessage> = decode(&broker, "collections");
        assert_eq!(collections.len(), 1);
        match &collections[0] {
            CollectionMessage::CollectionCreated(c) => {
                assert_eq!(c.index, "c1");
                assert_eq!(c.tx.block_height, 3);
                assert!(c.tx.tx_hash.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        let items: Vec<ItemMessage> = decode(&broker, "items");
        assert_eq!(items.len(), 2);
        assert!(cursors.snapshot().is_empty());
        // Only the height carrying token events needed its header
        assert_eq!(mock.block_time_calls(), 2);
        let persisted = storage.transactions().await;
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].hash, "TX");
    }

    #[tokio::test]
    async fn interrupted_range_resumes_in_tx_phase() {
        let Fixture {
            mock,
            cursors,
            broker,
            producer,
            ..
        } = setup();
        mock.add_block_events(2, vec![event(EVENT_REMOVED_ITEM, &[(ATTR_ITEM_INDEX, "i9")])]);
        mock.add_tx(2, "TX", vec![event(EVENT_NEW_ITEM, &[(ATTR_ITEM_INDEX, "i1")])]);
        mock.fail_page(1);

        let range = BlockRange { start: 1, end: 2 };
        assert!(producer.process_range(range).await.is_err());
        assert_eq!(cursors.get("core_tokens_1_2_blocks").await.unwrap().as_deref(), Some("3"));
        assert_eq!(cursors.get("core_tokens_1_2_txs").await.unwrap().as_deref(), Some("1"));

        mock.heal();
        producer.process_range(range).await.unwrap();
        // The block phase is not replayed
        let items: Vec<ItemMessage> = decode(&broker, "items");
        assert_eq!(items.len(), 2);
        assert!(cursors.snapshot().is_empty());
    }
}
