//! Paged `tx_search` over one block range.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use bridgeindex_core::message::{BlockRange, TxContext};
use bridgeindex_core::IndexerError;
use bridgeindex_storage::Transaction;

use crate::rpc::{TendermintClient, TxResponse};

/// The `tx_search` query selecting every transaction of `range`.
pub fn range_query(range: &BlockRange) -> String {
    format!("tx.height>={} AND tx.height<={}", range.start, range.end)
}

/// A transaction paired with the time of the block that included it.
#[derive(Debug, Clone)]
pub struct TimedTx {
    pub tx: TxResponse,
    pub block_time: DateTime<Utc>,
}

impl TimedTx {
    pub fn succeeded(&self) -> bool {
        self.tx.tx_result.code == 0
    }

    pub fn context(&self) -> TxContext {
        TxContext {
            tx_hash: self.tx.hash.clone(),
            block_height: self.tx.height,
            block_time: self.block_time,
        }
    }

    pub fn to_row(&self) -> Transaction {
        Transaction {
            hash: self.tx.hash.clone(),
            height: self.tx.height,
            time: self.block_time,
            code: self.tx.tx_result.code,
            raw_log: self.tx.tx_result.log.clone(),
        }
    }
}

/// Fetch one page and attach block times. Headers are fetched once per
/// height within the page.
pub async fn fetch_page(
    client: &dyn TendermintClient,
    query: &str,
    page: u64,
    page_size: u32,
) -> Result<Vec<TimedTx>, IndexerError> {
    let page = u32::try_from(page).map_err(|e| IndexerError::Decode(format!("page {page} out of range: {e}")))?;
    let txs = client.tx_search(query, page, page_size).await?;

    let mut times: HashMap<i64, DateTime<Utc>> = HashMap::new();
    let mut out = Vec::with_capacity(txs.len());
    for tx in txs {
        let block_time = match times.get(&tx.height) {
            Some(t) => *t,
            None => {
                let t = client.block_time(tx.height).await?;
                times.insert(tx.height, t);
                t
            }
        };
        out.push(TimedTx { tx, block_time });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTendermint;

    #[test]
    fn query_covers_inclusive_range() {
        assert_eq!(
            range_query(&BlockRange { start: 5, end: 9 }),
            "tx.height>=5 AND tx.height<=9"
        );
    }

    #[tokio::test]
    async fn block_times_are_fetched_once_per_height() {
        let mock = MockTendermint::default();
        mock.add_tx(10, "A", vec![]);
        mock.add_tx(10, "B", vec![]);
        mock.add_tx(11, "C", vec![]);

        let page = fetch_page(&mock, &range_query(&BlockRange { start: 10, end: 11 }), 1, 10)
            .await
            .unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(mock.block_time_calls(), 2);
        assert_eq!(page[2].context().block_height, 11);
    }
}
