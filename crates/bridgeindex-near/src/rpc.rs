//! NEAR JSON-RPC access: `block`, `chunk`, `EXPERIMENTAL_tx_status`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use bridgeindex_core::rpc::{CallError, JsonRpcClient};
use bridgeindex_core::IndexerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHeader {
    pub chunk_hash: String,
    #[serde(default)]
    pub shard_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearBlock {
    pub header: BlockHeader,
    #[serde(default)]
    pub chunks: Vec<ChunkHeader>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkTransaction {
    pub hash: String,
    pub signer_id: String,
    pub receiver_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearChunk {
    #[serde(default)]
    pub transactions: Vec<ChunkTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default)]
    pub logs: Vec<String>,
    pub executor_id: String,
    /// `{"SuccessValue": ..}`, `{"SuccessReceiptId": ..}` or `{"Failure": ..}`.
    #[serde(default)]
    pub status: Value,
}

impl Outcome {
    pub fn succeeded(&self) -> bool {
        self.status.get("Failure").is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptOutcome {
    pub id: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxStatus {
    #[serde(default)]
    pub receipts_outcome: Vec<ReceiptOutcome>,
}

#[async_trait]
pub trait NearRpcClient: Send + Sync {
    /// Height of the latest final block.
    async fn final_height(&self) -> Result<u64, IndexerError>;

    /// The block at `height`, `None` when the height was skipped.
    async fn block(&self, height: u64) -> Result<Option<NearBlock>, IndexerError>;

    async fn chunk(&self, chunk_hash: &str) -> Result<NearChunk, IndexerError>;

    async fn tx_status(&self, tx_hash: &str, sender_id: &str) -> Result<TxStatus, IndexerError>;
}

/// [`NearRpcClient`] over HTTP.
pub struct HttpNearClient {
    rpc: JsonRpcClient,
}

impl HttpNearClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        Ok(Self {
            rpc: JsonRpcClient::new(url, request_timeout)?,
        })
    }
}

#[async_trait]
impl NearRpcClient for HttpNearClient {
    async fn final_height(&self) -> Result<u64, IndexerError> {
        let block: NearBlock = self.rpc.call("block", json!({ "finality": "final" })).await?;
        Ok(block.header.height)
    }

    async fn block(&self, height: u64) -> Result<Option<NearBlock>, IndexerError> {
        match self.rpc.try_call("block", json!({ "block_id": height })).await {
            Ok(block) => Ok(Some(block)),
            Err(CallError::Node(e)) if is_unknown_block(&e.message, e.data.as_ref()) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn chunk(&self, chunk_hash: &str) -> Result<NearChunk, IndexerError> {
        self.rpc.call("chunk", json!({ "chunk_id": chunk_hash })).await
    }

    async fn tx_status(&self, tx_hash: &str, sender_id: &str) -> Result<TxStatus, IndexerError> {
        self.rpc.call("EXPERIMENTAL_tx_status", json!([tx_hash, sender_id])).await
    }
}

/// Skipped heights come back as a handler error naming the missing block.
fn is_unknown_block(message: &str, data: Option<&Value>) -> bool {
    let data = data.map(Value::to_string).unwrap_or_default();
    [message, data.as_str()]
        .iter()
        .any(|s| s.contains("UNKNOWN_BLOCK") || s.contains("DB Not Found"))
}
