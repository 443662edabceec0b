//! Structured contract events (NEP-297) emitted as `EVENT_JSON:` log lines.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_JSON_PREFIX: &str = "EVENT_JSON:";

/// Withdrawal event kinds emitted by the bridge contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalKind {
    FtWithdrawn,
    NftWithdrawn,
    NativeWithdrawn,
}

impl WithdrawalKind {
    fn parse(event: &str) -> Option<Self> {
        match event {
            "ft_withdrawn" => Some(Self::FtWithdrawn),
            "nft_withdrawn" => Some(Self::NftWithdrawn),
            "native_withdrawn" => Some(Self::NativeWithdrawn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawEvent {
    standard: String,
    version: String,
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct WithdrawalData {
    origin: String,
}

/// One withdrawal extracted from a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearWithdrawal {
    pub kind: WithdrawalKind,
    pub origin: String,
}

/// Parse one log line. Anything that is not a well-formed withdrawal event
/// yields an empty list.
pub fn parse_withdrawals(log: &str) -> Vec<NearWithdrawal> {
    let Some(json) = log.strip_prefix(EVENT_JSON_PREFIX) else {
        return Vec::new();
    };
    let event: RawEvent = match serde_json::from_str(json.trim()) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed EVENT_JSON log");
            return Vec::new();
        }
    };
    if event.standard.is_empty() || event.version.is_empty() {
        tracing::warn!(event = %event.event, "Skipping EVENT_JSON log without standard or version");
        return Vec::new();
    }
    let Some(kind) = WithdrawalKind::parse(&event.event) else {
        return Vec::new();
    };

    // `data` is an array of entries; a lone object is accepted too
    let entries = match event.data {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => Vec::new(),
    };
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<WithdrawalData>(entry) {
            Ok(d) => Some(NearWithdrawal { kind, origin: d.origin }),
            Err(e) => {
                tracing::warn!(event = %event.event, error = %e, "Skipping withdrawal entry without origin");
                None
            }
        })
        .collect()
}
