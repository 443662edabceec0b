//! Bridge-submodule producer: turns core-chain transactions of a block range
//! into operation messages.
//!
//! Consumes `block_range` messages. Each range is paged through `tx_search`
//! with its own page cursor, so a restart resumes at the first page whose
//! messages were not yet all published.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use bridgeindex_bus::{BatchHandler, Publish};
use bridgeindex_core::message::{decode_batch, to_envelopes, BlockRange, Envelope, OperationMessage, RangeMessage};
use bridgeindex_core::{cursor_key, CursorManager, CursorStore, IndexerError, InitialPosition};
use bridgeindex_storage::Storage;

use crate::events::OperationBatches;
use crate::pages::{fetch_page, range_query, TimedTx};
use crate::rpc::TendermintClient;

/// Destination queues, one per operation kind.
#[derive(Clone)]
pub struct OperationQueues {
    pub transfers: Arc<dyn Publish>,
    pub confirmations: Arc<dyn Publish>,
    pub votes: Arc<dyn Publish>,
    pub approvals: Arc<dyn Publish>,
    pub rejections: Arc<dyn Publish>,
}

pub struct BridgeOperationProducer {
    client: Arc<dyn TendermintClient>,
    cursors: Arc<dyn CursorStore>,
    cursor_base: String,
    page_size: u32,
    queues: OperationQueues,
    storage: Arc<dyn Storage>,
    shutdown: CancellationToken,
}

impl BridgeOperationProducer {
    pub fn new(
        client: Arc<dyn TendermintClient>,
        cursors: Arc<dyn CursorStore>,
        cursor_base: impl Into<String>,
        page_size: u32,
        queues: OperationQueues,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            client,
            cursors,
            cursor_base: cursor_base.into(),
            page_size: page_size.max(1),
            queues,
            storage,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop between pages once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn page_cursor(&self, range: &BlockRange) -> CursorManager {
        let key = cursor_key(&[&self.cursor_base, &range.start.to_string(), &range.end.to_string()]);
        CursorManager::new(self.cursors.clone(), key, &InitialPosition::Genesis)
    }

    /// Drain every page of `range`, then drop its cursor.
    pub async fn process_range(&self, range: BlockRange) -> Result<(), IndexerError> {
        let cursor = self.page_cursor(&range);
        let query = range_query(&range);
        let mut page = cursor.load_height().await?;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(IndexerError::Aborted {
                    reason: format!("shutdown while processing range {range}"),
                });
            }
            let txs = fetch_page(&*self.client, &query, page, self.page_size).await?;
            if txs.is_empty() {
                break;
            }

            let mut batches = OperationBatches::default();
            for tx in txs.iter().filter(|t| t.succeeded()) {
                batches.extend_from_events(&tx.tx.tx_result.events, &tx.context());
            }
            self.publish(&batches).await?;
            self.persist(&txs).await?;

            tracing::debug!(
                range_start = range.start,
                range_end = range.end,
                page,
                txs = txs.len(),
                operations = batches.len(),
                "Processed page"
            );
            page += 1;
            cursor.advance(page).await;
        }

        cursor.clear().await;
        tracing::info!(range_start = range.start, range_end = range.end, "Range drained");
        Ok(())
    }

    async fn publish(&self, batches: &OperationBatches) -> Result<(), IndexerError> {
        let routes: [(&Arc<dyn Publish>, &Vec<OperationMessage>); 5] = [
            (&self.queues.transfers, &batches.transfers),
            (&self.queues.confirmations, &batches.confirmations),
            (&self.queues.votes, &batches.votes),
            (&self.queues.approvals, &batches.approvals),
            (&self.queues.rejections, &batches.rejections),
        ];
        for (queue, msgs) in routes {
            queue.publish_msgs(&to_envelopes(msgs)?).await?;
        }
        Ok(())
    }

    async fn persist(&self, txs: &[TimedTx]) -> Result<(), IndexerError> {
        let rows: Vec<_> = txs.iter().map(TimedTx::to_row).collect();
        let mut tx = self.storage.begin().await?;
        tx.insert_transactions(&rows).await?;
        tx.commit().await
    }
}

#[async_trait]
impl BatchHandler for BridgeOperationProducer {
    fn name(&self) -> &str {
        "bridge-operations"
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
    use crate::testing::{event, time_of, MockTendermint};
    use bridgeindex_bus::{MemoryBroker, Publisher};
    use bridgeindex_core::message::MessageFamily;
    use bridgeindex_core::{MemoryCursorStore, RetryConfig};
    use bridgeindex_storage::InMemoryStorage;

    struct Fixture {
        mock: Arc<MockTendermint>,
        cursors: Arc<MemoryCursorStore>,
        broker: Arc<MemoryBroker>,
        storage: InMemoryStorage,
        producer: BridgeOperationProducer,
    }

    fn fixture(page_size: u32) -> Fixture {
        let mock = Arc::new(MockTendermint::default());
        let cursors = Arc::new(MemoryCursorStore::new());
        let broker = Arc::new(MemoryBroker::new());
        let storage = InMemoryStorage::new();
        let queue = |name: &str| -> Arc<dyn Publish> {
            Arc::new(Publisher::new(broker.queue(name), RetryConfig::default()))
        };
        let queues = OperationQueues {
            transfers: queue("transfers"),
            confirmations: queue("confirmations"),
            votes: queue("votes"),
            approvals: queue("approvals"),
            rejections: queue("rejections"),
        };
        let producer = BridgeOperationProducer::new(
            mock.clone(),
            cursors.clone(),
            "core_bridge",
            page_size,
            queues,
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

    fn messages(broker: &MemoryBroker, queue: &str) -> Vec<OperationMessage> {
        broker
            .queue(queue)
            .ready_bodies()
            .iter()
            .map(|b| OperationMessage::from_envelope(&Envelope::from_bytes(b).unwrap()).unwrap())
            .collect()
    }

    fn transfer(op: &str) -> crate::rpc::AbciEvent {
        event(EVENT_NEW_OPERATION, &[(ATTR_OPERATION_ID, op), (ATTR_OPERATION_TYPE, "TRANSFER")])
    }

    #[tokio::test]
    async fn pages_through_range_and_routes_events() {
        let f = fixture(2);
        f.mock.add_tx(100, "T1", vec![transfer("op-1")]);
        f.mock.add_tx(101, "T2", vec![event(EVENT_OPERATION_APPROVED, &[(ATTR_OPERATION_ID, "op-1")])]);
        f.mock.add_tx(102, "T3", vec![event(EVENT_VOTE, &[(ATTR_OPERATION_ID, "op-1"), (ATTR_VOTE, "NO")])]);
        f.mock.add_failed_tx(102, "T4", vec![transfer("op-9")]);
        f.mock.add_tx(200, "OUT", vec![transfer("op-2")]);

        f.producer.process_range(BlockRange { start: 100, end: 150 }).await.unwrap();

        let transfers = messages(&f.broker, "transfers");
        assert_eq!(transfers.len(), 1);
        match &transfers[0] {
            OperationMessage::TransferOp(r) => {
                assert_eq!(r.operation_id, "op-1");
                assert_eq!(r.tx.tx_hash, "T1");
                assert_eq!(r.tx.block_time, time_of(100));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(messages(&f.broker, "approvals").len(), 1);
        assert_eq!(messages(&f.broker, "votes").len(), 1);
        assert!(messages(&f.broker, "rejections").is_empty());

        // Two full pages, then the empty page that ends the range
        assert_eq!(f.mock.searched_pages(), vec![1, 2, 3]);
        assert!(f.cursors.snapshot().is_empty());
        assert_eq!(f.storage.transactions().await.len(), 4);
    }

    #[tokio::test]
    async fn failed_page_resumes_from_its_cursor() {
        let f = fixture(1);
        f.mock.add_tx(10, "A", vec![transfer("op-a")]);
        f.mock.add_tx(11, "B", vec![transfer("op-b")]);
        f.mock.fail_page(2);

        let range = BlockRange { start: 10, end: 20 };
        assert!(f.producer.process_range(range).await.is_err());
        assert_eq!(
            f.cursors.get("core_bridge_10_20").await.unwrap().as_deref(),
            Some("2")
        );
        assert_eq!(messages(&f.broker, "transfers").len(), 1);

        f.mock.heal();
        f.producer.process_range(range).await.unwrap();
        assert_eq!(messages(&f.broker, "transfers").len(), 2);
        assert_eq!(f.mock.searched_pages(), vec![1, 2, 2, 3]);
        assert!(f.cursors.get("core_bridge_10_20").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handler_decodes_ranges_and_stops_on_shutdown() {
        let f = fixture(10);
        f.mock.add_tx(5, "A", vec![transfer("op-a")]);
        let batch = to_envelopes(&[RangeMessage::BlockRange(BlockRange { start: 1, end: 9 })]).unwrap();

        f.producer.handle(&batch).await.unwrap();
        assert_eq!(messages(&f.broker, "transfers").len(), 1);

        let token = CancellationToken::new();
        let stopped = BridgeOperationProducer {
            shutdown: token.clone(),
            ..f.producer
        };
        token.cancel();
        let err = stopped.handle(&batch).await.unwrap_err();
        assert!(matches!(err, IndexerError::Aborted { .. }));
    }
}
