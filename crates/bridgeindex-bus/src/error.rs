//! Error types for the message bus.

use bridgeindex_core::IndexerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish to '{queue}' failed: {reason}")]
    Publish { queue: String, reason: String },

    #[error("consume from '{queue}' failed: {reason}")]
    Consume { queue: String, reason: String },

    #[error("settling deliveries on '{queue}' failed: {reason}")]
    Settle { queue: String, reason: String },

    #[error("encode error: {0}")]
    Encode(String),
}

impl From<BusError> for IndexerError {
    fn from(e: BusError) -> Self {
        IndexerError::Bus(e.to_string())
    }
}
