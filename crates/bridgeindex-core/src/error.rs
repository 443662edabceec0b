//! Error types for the bridgeindex pipeline.

use thiserror::Error;

/// Errors that can occur while producing or consuming bridge events.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for infrastructure failures that a retry may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Storage(_) | Self::Bus(_))
    }

    /// Wrap an error raised inside a named handler.
    pub fn handler(handler: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Handler {
            handler: handler.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(IndexerError::Rpc("timeout".into()).is_transient());
        assert!(IndexerError::Bus("disconnected".into()).is_transient());
        assert!(!IndexerError::Decode("bad json".into()).is_transient());
        assert!(!IndexerError::handler("transfers", "boom").is_transient());
    }

    #[test]
    fn handler_error_display() {
        let e = IndexerError::handler("erc20", "receipt missing");
        assert_eq!(e.to_string(), "Handler error in 'erc20': receipt missing");
    }
}
