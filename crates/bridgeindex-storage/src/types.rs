//! Rows of the relational aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bridgeindex_core::{IndexerError, VoteChoice};

/// Lifecycle status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Initialized,
    Approved,
    NotApproved,
    Signed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Approved => "approved",
            Self::NotApproved => "not_approved",
            Self::Signed => "signed",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = IndexerError;

    /// Accepts both the stored form (`not_approved`) and the core chain's
    /// enum names (`NOT_APPROVED`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "initialized" => Ok(Self::Initialized),
            "approved" => Ok(Self::Approved),
            "not_approved" | "notapproved" => Ok(Self::NotApproved),
            "signed" => Ok(Self::Signed),
            other => Err(IndexerError::Decode(format!("unknown transfer status {other:?}"))),
        }
    }
}

/// A cross-chain transfer, keyed by the index the core chain assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub index: String,
    pub status: TransferStatus,
    pub from_chain: String,
    pub to_chain: String,
    pub amount: String,
    pub receiver: String,
    pub creator: String,
    pub bundle_data: String,
    pub bundle_salt: String,
    /// Settlement correlation key matched against withdrawals.
    pub origin: String,
    pub event_id: String,
    /// Source-chain transaction hash.
    pub tx_hash: String,
    /// Core-chain transaction that created the operation.
    pub rarimo_tx_hash: String,
    pub token_index: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub transfer_index: String,
    /// Merkle root the confirmation signs.
    pub root: String,
    pub source_tx_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub transfer_index: String,
    pub source_tx_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub transfer_index: String,
    pub source_tx_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub transfer_index: String,
    pub choice: VoteChoice,
    pub source_tx_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Destination-chain settlement of a transfer. Written once per origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub origin: String,
    pub hash: String,
    pub success: bool,
    pub block_height: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Raw core-chain transaction kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub height: i64,
    pub time: DateTime<Utc>,
    pub code: i64,
    pub raw_log: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub index: String,
    pub name: String,
    pub symbol: String,
    pub metadata_uri: String,
}

/// Deployment of a collection on one chain, keyed by `(chain, address)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionData {
    pub chain: String,
    pub address: String,
    pub collection_index: String,
    pub token_type: String,
    pub decimals: i32,
    pub wrapped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub index: String,
    pub collection_index: String,
    pub metadata_uri: String,
}

/// Where an item lives on one chain, keyed by `(item_index, chain)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChainMapping {
    pub item_index: String,
    pub chain: String,
    pub address: String,
    pub token_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    pub seed: String,
    pub item_index: String,
}

/// What the status recompute needs to know about a transfer's evidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferEvidence {
    pub has_confirmation: bool,
    pub latest_approval: Option<DateTime<Utc>>,
    pub latest_rejection: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_core_chain_names() {
        assert_eq!("NOT_APPROVED".parse::<TransferStatus>().unwrap(), TransferStatus::NotApproved);
        assert_eq!("signed".parse::<TransferStatus>().unwrap(), TransferStatus::Signed);
        assert!("pending".parse::<TransferStatus>().is_err());
        assert_eq!(TransferStatus::NotApproved.to_string(), "not_approved");
    }
}
