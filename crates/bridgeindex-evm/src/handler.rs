//! Per-asset withdrawal handlers.
//!
//! The bridge contract emits one `Withdrawn*` event per asset kind. Each
//! handler scans its own event signature with its own cursor, so one asset
//! kind failing never holds back another.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use bridgeindex_bus::Publish;
use bridgeindex_core::message::{to_envelopes, WithdrawalEvent, WithdrawalMessage};
use bridgeindex_core::{CursorManager, IndexerError};

use crate::rpc::{EvmRpcClient, RawLog};

/// Asset kinds the bridge contract settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Native,
    Erc20,
    Erc721,
    Erc1155,
}

impl AssetKind {
    pub const ALL: [AssetKind; 4] = [Self::Native, Self::Erc20, Self::Erc721, Self::Erc1155];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Erc20 => "erc20",
            Self::Erc721 => "erc721",
            Self::Erc1155 => "erc1155",
        }
    }

    /// Solidity signature of the withdrawal event. The origin hash is always
    /// the last parameter.
    pub fn event_signature(&self) -> &'static str {
        match self {
            Self::Native => "WithdrawnNative(address,uint256,bytes32)",
            Self::Erc20 => "WithdrawnERC20(address,address,uint256,bytes32)",
            Self::Erc721 => "WithdrawnERC721(address,uint256,address,bytes32)",
            Self::Erc1155 => "WithdrawnERC1155(address,uint256,uint256,address,bytes32)",
        }
    }

    /// `keccak256(signature)`, 0x-prefixed.
    pub fn topic(&self) -> String {
        use tiny_keccak::{Hasher, Keccak};

        let mut k = Keccak::v256();
        k.update(self.event_signature().as_bytes());
        let mut out = [0u8; 32];
        k.finalize(&mut out);
        format!("0x{}", hex::encode(out))
    }
}

/// The origin hash: the last 32-byte word of the log data.
pub fn origin_from_data(data: &str) -> Option<String> {
    let bytes = hex::decode(data.strip_prefix("0x").unwrap_or(data)).ok()?;
    if bytes.len() < 32 || bytes.len() % 32 != 0 {
        return None;
    }
    Some(format!("0x{}", hex::encode(&bytes[bytes.len() - 32..])))
}

/// Scans one withdrawal event signature on one chain.
pub struct WithdrawnHandler {
    kind: AssetKind,
    chain: String,
    bridge_address: String,
    topic: String,
    max_block_range: u64,
    client: Arc<dyn EvmRpcClient>,
    cursor: CursorManager,
    publisher: Arc<dyn Publish>,
}

impl WithdrawnHandler {
    pub fn new(
        kind: AssetKind,
        chain: impl Into<String>,
        bridge_address: impl Into<String>,
        max_block_range: u64,
        client: Arc<dyn EvmRpcClient>,
        cursor: CursorManager,
        publisher: Arc<dyn Publish>,
    ) -> Self {
        Self {
            kind,
            chain: chain.into(),
            bridge_address: bridge_address.into(),
            topic: kind.topic(),
            max_block_range: max_block_range.max(1),
            client,
            cursor,
            publisher,
        }
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    /// Scan from the cursor up to the current head.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<(), IndexerError> {
        let from = self.cursor.load_height().await?;
        let head = self.client.block_number().await?;
        if from > head {
            return Ok(());
        }

        let mut start = from;
        while start <= head {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            let end = start.saturating_add(self.max_block_range - 1).min(head);
            let mut logs = self
                .client
                .get_logs(start, end, &self.bridge_address, &self.topic)
                .await?;
            logs.sort_by_key(|l| (l.block_number_u64(), l.log_index_u64()));

            for log in &logs {
                self.process_log(log).await?;
            }
            tracing::debug!(
                chain = %self.chain,
                handler = self.kind.name(),
                range_start = start,
                range_end = end,
                logs = logs.len(),
                "Scanned block range"
            );
            self.cursor.advance(end + 1).await;
            start = end + 1;
        }
        Ok(())
    }

    async fn process_log(&self, log: &RawLog) -> Result<(), IndexerError> {
        if log.is_removed() {
            tracing::warn!(chain = %self.chain, handler = self.kind.name(), tx = %log.tx_hash, "Skipping removed log");
            return Ok(());
        }
        let (Some(origin), Some(block)) = (origin_from_data(&log.data), log.block_number_u64()) else {
            tracing::warn!(chain = %self.chain, handler = self.kind.name(), tx = %log.tx_hash, "Skipping malformed log");
            return Ok(());
        };

        let receipt = self
            .client
            .transaction_receipt(&log.tx_hash)
            .await?
            .ok_or_else(|| IndexerError::Rpc(format!("receipt for {} not found", log.tx_hash)))?;

        let msg = WithdrawalMessage::Withdrawal(WithdrawalEvent {
            origin: origin.clone(),
            hash: log.tx_hash.clone(),
            success: receipt.succeeded(),
            block_height: Some(block),
        });
        self.publisher.publish_msgs(&to_envelopes(&[msg])?).await?;
        tracing::info!(chain = %self.chain, handler = self.kind.name(), %origin, tx = %log.tx_hash, block, "Withdrawal published");

        // Replaying from this block re-publishes its earlier logs, which the
        // withdrawal indexer discards by origin
        self.cursor.advance(block).await;
        Ok(())
    }
}
