//! Tendermint JSON-RPC access: `status`, `tx_search`, `block`, `block_results`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use bridgeindex_core::rpc::{CallError, JsonRpcClient};
use bridgeindex_core::IndexerError;

/// One ABCI event attribute. CometBFT ≥ 0.37 sends them as plain strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

impl AbciEvent {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .and_then(|a| a.value.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxResult {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub log: String,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub events: Vec<AbciEvent>,
}

/// A transaction as returned by `tx_search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxResponse {
    pub hash: String,
    #[serde(deserialize_with = "de::i64_from_str")]
    pub height: i64,
    #[serde(default)]
    pub tx_result: TxResult,
}

#[derive(Debug, Clone, Deserialize)]
struct TxSearchResult {
    #[serde(default)]
    txs: Vec<TxResponse>,
}

/// Block-level events of one height.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockResults {
    #[serde(deserialize_with = "de::i64_from_str")]
    pub height: i64,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub begin_block_events: Vec<AbciEvent>,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub end_block_events: Vec<AbciEvent>,
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub finalize_block_events: Vec<AbciEvent>,
}

impl BlockResults {
    /// Events emitted outside any transaction.
    pub fn block_events(&self) -> impl Iterator<Item = &AbciEvent> {
        self.begin_block_events
            .iter()
            .chain(&self.end_block_events)
            .chain(&self.finalize_block_events)
    }
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    #[serde(deserialize_with = "de::i64_from_str")]
    latest_block_height: i64,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: Header,
}

#[derive(Debug, Deserialize)]
struct Header {
    time: DateTime<Utc>,
}

/// Core-chain Tendermint RPC.
#[async_trait]
pub trait TendermintClient: Send + Sync {
    /// Latest committed height, `None` while the node reports none.
    async fn latest_height(&self) -> Result<Option<i64>, IndexerError>;

    /// One page of `tx_search` results in ascending height order. A page past
    /// the end is an empty page.
    async fn tx_search(&self, query: &str, page: u32, per_page: u32) -> Result<Vec<TxResponse>, IndexerError>;

    async fn block_time(&self, height: i64) -> Result<DateTime<Utc>, IndexerError>;

    async fn block_results(&self, height: i64) -> Result<BlockResults, IndexerError>;
}

/// [`TendermintClient`] over HTTP.
pub struct HttpTendermintClient {
    rpc: JsonRpcClient,
}

impl HttpTendermintClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        Ok(Self {
            rpc: JsonRpcClient::new(url, request_timeout)?,
        })
    }
}

#[async_trait]
impl TendermintClient for HttpTendermintClient {
    async fn latest_height(&self) -> Result<Option<i64>, IndexerError> {
        let status: StatusResult = self.rpc.call("status", json!({})).await?;
        let height = status.sync_info.latest_block_height;
        Ok((height > 0).then_some(height))
    }

    async fn tx_search(&self, query: &str, page: u32, per_page: u32) -> Result<Vec<TxResponse>, IndexerError> {
        let params = json!({
            "query": query,
            "prove": false,
            "page": page.to_string(),
            "per_page": per_page.to_string(),
            "order_by": "asc",
        });
        match self.rpc.try_call::<TxSearchResult>("tx_search", params).await {
            Ok(result) => Ok(result.txs),
            Err(CallError::Node(e)) if is_page_out_of_range(&e.message, e.data.as_ref()) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn block_time(&self, height: i64) -> Result<DateTime<Utc>, IndexerError> {
        let block: BlockResult = self.rpc.call("block", json!({ "height": height.to_string() })).await?;
        Ok(block.block.header.time)
    }

    async fn block_results(&self, height: i64) -> Result<BlockResults, IndexerError> {
        self.rpc.call("block_results", json!({ "height": height.to_string() })).await
    }
}

fn is_page_out_of_range(message: &str, data: Option<&serde_json::Value>) -> bool {
    const MARKER: &str = "page should be within";
    message.contains(MARKER) || data.map(|d| d.to_string().contains(MARKER)).unwrap_or(false)
}

mod de {
    use serde::{Deserialize, Deserializer};

    /// Tendermint encodes 64-bit integers as strings.
    pub fn i64_from_str<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StrOrNum {
            Str(String),
            Num(i64),
        }
        match StrOrNum::deserialize(d)? {
            StrOrNum::Str(s) => s.parse().map_err(serde::de::Error::custom),
            StrOrNum::Num(n) => Ok(n),
        }
    }

    pub fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
    }
}
