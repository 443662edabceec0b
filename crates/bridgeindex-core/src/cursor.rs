//! Cursor store: persisted pointers to the next unprocessed position of a stream.
//!
//! A cursor is a plain `{key, position}` pair. Producers read their cursor,
//! publish the unit of work it guards, and only then move it forward, so a
//! crash between publish and persist replays the unit instead of losing it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// A persisted cursor record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub key: String,
    pub position: String,
}

/// Key/value persistence for cursors.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Read the position stored under `key`, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError>;

    /// Upsert the position stored under `key`.
    async fn set(&self, key: &str, position: &str) -> Result<(), IndexerError>;

    /// Delete the cursor. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), IndexerError>;
}

/// Build a deterministic cursor key from its parts: `evm_goerli_erc20`.
pub fn cursor_key(parts: &[&str]) -> String {
    parts.join("_")
}

/// Where a stream starts the first time its cursor is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialPosition {
    /// An empty position (streams keyed by something other than height).
    Empty,
    /// The first block of the chain.
    Genesis,
    /// An explicit height, e.g. the chain head when catch-up is skipped.
    Height(u64),
}

impl InitialPosition {
    /// Resolve the start position from configuration.
    ///
    /// With `skip_catchup` the chain head is queried once and used as the
    /// start so historical blocks are never scanned.
    pub async fn resolve<F, Fut>(
        skip_catchup: bool,
        configured_start: Option<u64>,
        head: F,
    ) -> Result<Self, IndexerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, IndexerError>>,
    {
        if skip_catchup {
            return Ok(Self::Height(head().await?));
        }
        Ok(configured_start.map(Self::Height).unwrap_or(Self::Genesis))
    }

    pub fn to_position(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Genesis => "1".into(),
            Self::Height(h) => h.to_string(),
        }
    }
}

/// Binds a store to one cursor key and its initial value.
#[derive(Clone)]
pub struct CursorManager {
    store: Arc<dyn CursorStore>,
    key: String,
    initial: String,
}

impl CursorManager {
    pub fn new(
        store: Arc<dyn CursorStore>,
        key: impl Into<String>,
        initial: &InitialPosition,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            initial: initial.to_position(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the cursor, seeding and persisting the initial value if absent.
    pub async fn load(&self) -> Result<String, IndexerError> {
        if let Some(position) = self.store.get(&self.key).await? {
            return Ok(position);
        }
        tracing::info!(cursor = %self.key, position = %self.initial, "Seeding cursor");
        self.store.set(&self.key, &self.initial).await?;
        Ok(self.initial.clone())
    }

    /// Read the cursor as a block height.
    pub async fn load_height(&self) -> Result<u64, IndexerError> {
        let position = self.load().await?;
        position.parse::<u64>().map_err(|e| {
            IndexerError::Decode(format!("cursor {} holds non-numeric {position:?}: {e}", self.key))
        })
    }

    /// Persist a new position.
    ///
    /// A failed write is logged and swallowed: the next iteration re-reads the
    /// old position and replays the unit, which downstream consumers absorb.
    pub async fn advance(&self, position: impl std::fmt::Display) {
        let position = position.to_string();
        if let Err(e) = self.store.set(&self.key, &position).await {
            tracing::warn!(cursor = %self.key, %position, error = %e, "Failed to persist cursor");
        }
    }

    /// Remove the cursor once its stream is drained. Failures are logged.
    pub async fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key).await {
            tracing::warn!(cursor = %self.key, error = %e, "Failed to remove cursor");
        }
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory cursor store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCursorStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All cursors currently stored, sorted by key.
    pub fn snapshot(&self) -> Vec<Cursor> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let mut cursors: Vec<_> = data
            .iter()
            .map(|(k, v)| Cursor {
                key: k.clone(),
                position: v.clone(),
            })
            .collect();
        cursors.sort_by(|a, b| a.key.cmp(&b.key));
        cursors
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, position: &str) -> Result<(), IndexerError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.insert(key.to_string(), position.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), IndexerError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.remove(key);
        Ok(())
    }
}
