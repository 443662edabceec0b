//! In-process Tendermint node for producer tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use bridgeindex_core::IndexerError;

use crate::rpc::{AbciEvent, BlockResults, EventAttribute, TendermintClient, TxResponse, TxResult};

pub fn event(kind: &str, attrs: &[(&str, &str)]) -> AbciEvent {
    AbciEvent {
        kind: kind.into(),
        attributes: attrs
            .iter()
            .map(|(k, v)| EventAttribute {
                key: k.to_string(),
                value: Some(v.to_string()),
            })
            .collect(),
    }
}

pub fn time_of(height: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + height, 0).unwrap()
}

#[derive(Default)]
pub struct MockTendermint {
    height: Mutex<Option<i64>>,
    txs: Mutex<Vec<TxResponse>>,
    block_events: Mutex<HashMap<i64, Vec<AbciEvent>>>,
    failing_pages: Mutex<HashSet<u32>>,
    block_time_calls: AtomicUsize,
    searches: Mutex<Vec<u32>>,
}

impl MockTendermint {
    pub fn set_height(&self, height: i64) {
        *self.height.lock().unwrap() = Some(height);
    }

    pub fn add_tx(&self, height: i64, hash: &str, events: Vec<AbciEvent>) {
        self.push_tx(height, hash, 0, events);
    }

    pub fn add_failed_tx(&self, height: i64, hash: &str, events: Vec<AbciEvent>) {
        self.push_tx(height, hash, 5, events);
    }

    fn push_tx(&self, height: i64, hash: &str, code: i64, events: Vec<AbciEvent>) {
        self.txs.lock().unwrap().push(TxResponse {
            hash: hash.into(),
            height,
            tx_result: TxResult {
                code,
                log: format!("log-{hash}"),
                events,
            },
        });
    }

    pub fn add_block_events(&self, height: i64, events: Vec<AbciEvent>) {
        self.block_events.lock().unwrap().insert(height, events);
    }

    /// Fail every `tx_search` for `page` until [`heal`](Self::heal).
    pub fn fail_page(&self, page: u32) {
        self.failing_pages.lock().unwrap().insert(page);
    }

    pub fn heal(&self) {
        self.failing_pages.lock().unwrap().clear();
    }

    pub fn block_time_calls(&self) -> usize {
        self.block_time_calls.load(Ordering::SeqCst)
    }

    /// Pages requested so far, in order.
    pub fn searched_pages(&self) -> Vec<u32> {
        self.searches.lock().unwrap().clone()
    }
}

fn parse_range(query: &str) -> (i64, i64) {
    let mut start = i64::MIN;
    let mut end = i64::MAX;
    for clause in query.split(" AND ") {
        if let Some(v) = clause.strip_prefix("tx.height>=") {
            start = v.parse().unwrap();
        } else if let Some(v) = clause.strip_prefix("tx.height<=") {
            end = v.parse().unwrap();
        }
    }
    (start, end)
}

#[async_trait]
impl TendermintClient for MockTendermint {
    async fn latest_height(&self) -> Result<Option<i64>, IndexerError> {
        Ok(*self.height.lock().unwrap())
    }

    async fn tx_search(&self, query: &str, page: u32, per_page: u32) -> Result<Vec<TxResponse>, IndexerError> {
        self.searches.lock().unwrap().push(page);
        if self.failing_pages.lock().unwrap().contains(&page) {
            return Err(IndexerError::Rpc(format!("page {page} timed out")));
        }
        let (start, end) = parse_range(query);
        let mut matching: Vec<TxResponse> = self
            .txs
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| (start..=end).contains(&tx.height))
            .cloned()
            .collect();
        matching.sort_by_key(|tx| tx.height);
        let skip = (page.saturating_sub(1) * per_page) as usize;
        Ok(matching.into_iter().skip(skip).take(per_page as usize).collect())
    }

    async fn block_time(&self, height: i64) -> Result<DateTime<Utc>, IndexerError> {
        self.block_time_calls.fetch_add(1, Ordering::SeqCst);
        Ok(time_of(height))
    }

    async fn block_results(&self, height: i64) -> Result<BlockResults, IndexerError> {
        Ok(BlockResults {
            height,
            end_block_events: self.block_events.lock().unwrap().get(&height).cloned().unwrap_or_default(),
            ..Default::default()
        })
    }
}
