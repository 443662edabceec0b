//! Domain event envelope and the closed message families carried by the bus.
//!
//! Wire format: one JSON object per message body, `{"raw": <payload>, "type": "<tag>"}`.
//! Each family is an adjacently tagged enum, so decoding is a single serde
//! step keyed on the tag. Payloads carry identifying keys only; consumers
//! re-fetch authoritative state before writing.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::IndexerError;

/// Raw bus message: an opaque payload plus its type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub raw: Value,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexerError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self, IndexerError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Why an envelope could not be turned into a typed message.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unknown message type {0:?}")]
    UnknownType(String),

    #[error("malformed {kind} payload: {reason}")]
    Malformed { kind: String, reason: String },
}

/// A closed set of message variants sharing one queue.
pub trait MessageFamily: Serialize + DeserializeOwned + Sized {
    /// Every tag this family recognises.
    const TAGS: &'static [&'static str];

    fn to_envelope(&self) -> Result<Envelope, IndexerError> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }

    fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError> {
        if !Self::TAGS.contains(&env.kind.as_str()) {
            return Err(EnvelopeError::UnknownType(env.kind.clone()));
        }
        let value = serde_json::json!({ "type": env.kind, "raw": env.raw });
        serde_json::from_value(value).map_err(|e| EnvelopeError::Malformed {
            kind: env.kind.clone(),
            reason: e.to_string(),
        })
    }
}

/// Convert a batch of typed messages into envelopes.
pub fn to_envelopes<M: MessageFamily>(msgs: &[M]) -> Result<Vec<Envelope>, IndexerError> {
    msgs.iter().map(MessageFamily::to_envelope).collect()
}

/// Decode a batch, logging and dropping envelopes that do not belong to `M`.
pub fn decode_batch<M: MessageFamily>(consumer: &str, batch: &[Envelope]) -> Vec<M> {
    batch
        .iter()
        .filter_map(|env| match M::from_envelope(env) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(consumer, error = %e, "Skipping undecodable message");
                None
            }
        })
        .collect()
}

// ─── Shared payload pieces ────────────────────────────────────────────────────

/// Where on the core chain an event was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxContext {
    pub tx_hash: String,
    pub block_height: i64,
    pub block_time: DateTime<Utc>,
}

// ─── Block ranges ─────────────────────────────────────────────────────────────

/// An inclusive interval of core-chain heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: i64,
    pub end: i64,
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "raw", rename_all = "snake_case")]
pub enum RangeMessage {
    BlockRange(BlockRange),
}

impl MessageFamily for RangeMessage {
    const TAGS: &'static [&'static str] = &["block_range"];
}

// ─── Bridge operations ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRef {
    pub operation_id: String,
    #[serde(flatten)]
    pub tx: TxContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRef {
    pub confirmation_id: String,
    #[serde(flatten)]
    pub tx: TxContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    Yes,
    No,
}

impl std::str::FromStr for VoteChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            other => Err(format!("unknown vote choice {other:?}")),
        }
    }
}

impl std::fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "yes"),
            Self::No => write!(f, "no"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRef {
    pub operation_id: String,
    pub choice: VoteChoice,
    #[serde(flatten)]
    pub tx: TxContext,
}

/// Bridge-submodule events, one queue per variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "raw", rename_all = "snake_case")]
pub enum OperationMessage {
    TransferOp(OperationRef),
    ConfirmationOp(ConfirmationRef),
    VoteOp(VoteRef),
    ApprovalOp(OperationRef),
    RejectionOp(OperationRef),
}

impl MessageFamily for OperationMessage {
    const TAGS: &'static [&'static str] = &[
        "transfer_op",
        "confirmation_op",
        "vote_op",
        "approval_op",
        "rejection_op",
    ];
}

// ─── Token manager: collections ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRef {
    pub index: String,
    #[serde(flatten)]
    pub tx: TxContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDataRef {
    pub collection_index: String,
    pub chain: String,
    pub address: String,
    #[serde(flatten)]
    pub tx: TxContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "raw", rename_all = "snake_case")]
pub enum CollectionMessage {
    CollectionCreated(CollectionRef),
    CollectionRemoved(CollectionRef),
    CollectionDataCreated(CollectionDataRef),
    CollectionDataUpdated(CollectionDataRef),
    CollectionDataRemoved(CollectionDataRef),
}

impl MessageFamily for CollectionMessage {
    const TAGS: &'static [&'static str] = &[
        "collection_created",
        "collection_removed",
        "collection_data_created",
        "collection_data_updated",
        "collection_data_removed",
    ];
}

// ─── Token manager: items and seeds ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub index: String,
    #[serde(flatten)]
    pub tx: TxContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainItemRef {
    pub item_index: String,
    pub chain: String,
    #[serde(flatten)]
    pub tx: TxContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedRef {
    pub seed: String,
    pub item_index: String,
    #[serde(flatten)]
    pub tx: TxContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "raw", rename_all = "snake_case")]
pub enum ItemMessage {
    ItemCreated(ItemRef),
    ItemRemoved(ItemRef),
    ItemOnChainCreated(OnChainItemRef),
    ItemOnChainRemoved(OnChainItemRef),
    SeedCreated(SeedRef),
    SeedRemoved(SeedRef),
}

impl MessageFamily for ItemMessage {
    const TAGS: &'static [&'static str] = &[
        "item_created",
        "item_removed",
        "item_on_chain_created",
        "item_on_chain_removed",
        "seed_created",
        "seed_removed",
    ];
}

// ─── Destination-chain settlement ─────────────────────────────────────────────

/// A bridge withdrawal observed on a destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    /// Settlement correlation key (the transfer's origin).
    pub origin: String,
    /// Destination-chain transaction hash.
    pub hash: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "raw", rename_all = "snake_case")]
pub enum WithdrawalMessage {
    Withdrawal(WithdrawalEvent),
}

impl MessageFamily for WithdrawalMessage {
    const TAGS: &'static [&'static str] = &["withdrawal"];
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tx() -> TxContext {
        TxContext {
            tx_hash: "ABCD".into(),
            block_height: 120,
            block_time: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn envelope_wire_format() {
        let msg = WithdrawalMessage::Withdrawal(WithdrawalEvent {
            origin: "0x01".into(),
            hash: "0xff".into(),
            success: true,
            block_height: None,
        });
        let env = msg.to_envelope().unwrap();
        assert_eq!(env.kind, "withdrawal");

        let body: Value = serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(body["type"], "withdrawal");
        assert_eq!(body["raw"]["origin"], "0x01");
        assert!(body["raw"].get("block_height").is_none());
    }

    #[test]
    fn operation_payload_flattens_tx_context() {
        let msg = OperationMessage::VoteOp(VoteRef {
            operation_id: "op-1".into(),
            choice: VoteChoice::No,
            tx: tx(),
        });
        let env = msg.to_envelope().unwrap();
        assert_eq!(env.kind, "vote_op");
        assert_eq!(env.raw["tx_hash"], "ABCD");
        assert_eq!(env.raw["choice"], "no");

        let back = OperationMessage::from_envelope(&env).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_tag_is_rejected_before_parsing() {
        let env = Envelope {
            raw: serde_json::json!({}),
            kind: "collection_created".into(),
        };
        let err = OperationMessage::from_envelope(&env).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownType(k) if k == "collection_created"));
    }

    #[test]
    fn malformed_payload_is_reported() {
        let env = Envelope {
            raw: serde_json::json!({ "start": "x" }),
            kind: "block_range".into(),
        };
        assert!(matches!(
            RangeMessage::from_envelope(&env),
            Err(EnvelopeError::Malformed { .. })
        ));
    }

    #[test]
    fn decode_batch_skips_foreign_messages() {
        let good = ItemMessage::SeedCreated(SeedRef {
            seed: "s1".into(),
            item_index: "i1".into(),
            tx: tx(),
        })
        .to_envelope()
        .unwrap();
        let foreign = Envelope {
            raw: serde_json::json!({}),
            kind: "transfer_op".into(),
        };
        let decoded: Vec<ItemMessage> = decode_batch("items", &[foreign, good]);
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn vote_choice_parses_case_insensitively() {
        assert_eq!("YES".parse::<VoteChoice>().unwrap(), VoteChoice::Yes);
        assert!("maybe".parse::<VoteChoice>().is_err());
    }
}
