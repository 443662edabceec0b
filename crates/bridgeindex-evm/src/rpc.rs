//! EVM JSON-RPC access: `eth_blockNumber`, `eth_getLogs`, `eth_getTransactionReceipt`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use bridgeindex_core::rpc::JsonRpcClient;
use bridgeindex_core::IndexerError;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u64(&self) -> Option<u64> {
        parse_hex_u64(&self.log_index)
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// The receipt fields the scanner needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    /// `0x1` on success, `0x0` on revert.
    #[serde(default)]
    pub status: Option<String>,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_deref().and_then(parse_hex_u64) == Some(1)
    }
}

/// Trait for fetching EVM data from a JSON-RPC provider.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, IndexerError>;

    /// Logs emitted by `address` with first topic `topic0` in `[from, to]`.
    async fn get_logs(&self, from: u64, to: u64, address: &str, topic0: &str) -> Result<Vec<RawLog>, IndexerError>;

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, IndexerError>;
}

/// [`EvmRpcClient`] over HTTP.
pub struct HttpEvmClient {
    rpc: JsonRpcClient,
}

impl HttpEvmClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        Ok(Self {
            rpc: JsonRpcClient::new(url, request_timeout)?,
        })
    }
}

#[async_trait]
impl EvmRpcClient for HttpEvmClient {
    async fn block_number(&self) -> Result<u64, IndexerError> {
        let hex: String = self.rpc.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&hex).ok_or_else(|| IndexerError::Decode(format!("eth_blockNumber returned {hex:?}")))
    }

    async fn get_logs(&self, from: u64, to: u64, address: &str, topic0: &str) -> Result<Vec<RawLog>, IndexerError> {
        let filter = json!({
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
            "address": address,
            "topics": [topic0],
        });
        self.rpc.call("eth_getLogs", json!([filter])).await
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, IndexerError> {
        self.rpc.call("eth_getTransactionReceipt", json!([tx_hash])).await
    }
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1"), Some(1));
        assert_eq!(parse_hex_u64("0xff"), Some(255));
        assert_eq!(parse_hex_u64("1234"), Some(0x1234));
        assert_eq!(parse_hex_u64("0xzz"), None);
    }

    #[test]
    fn receipt_status() {
        let ok: TxReceipt = serde_json::from_value(json!({ "transactionHash": "0x1", "status": "0x1" })).unwrap();
        let reverted: TxReceipt = serde_json::from_value(json!({ "transactionHash": "0x2", "status": "0x0" })).unwrap();
        assert!(ok.succeeded());
        assert!(!reverted.succeeded());
    }

    #[test]
    fn raw_log_from_node_json() {
        let log: RawLog = serde_json::from_value(json!({
            "address": "0xbridge",
            "topics": ["0xabc"],
            "data": "0x",
            "blockNumber": "0x12a05f200",
            "blockHash": "0x0",
            "transactionHash": "0xdead",
            "logIndex": "0x5"
        }))
        .unwrap();
        assert_eq!(log.block_number_u64(), Some(5_000_000_000));
        assert_eq!(log.log_index_u64(), Some(5));
        assert!(!log.is_removed());
    }
}
