//! The `Producer` contract and the per-chain producer registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::IndexerError;
use crate::supervisor::{BackoffConfig, TaskSet};

/// Chain families the bridge is deployed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Near,
    Solana,
    Core,
}

impl std::fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Evm => write!(f, "evm"),
            Self::Near => write!(f, "near"),
            Self::Solana => write!(f, "solana"),
            Self::Core => write!(f, "core"),
        }
    }
}

/// One scan iteration over a chain.
///
/// `run` processes whatever is available and returns; the supervisor calls it
/// again after its normal period, or after a backoff if it failed.
#[async_trait]
pub trait Producer: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, shutdown: &CancellationToken) -> Result<(), IndexerError>;
}

/// Producer for chains whose settlement events are not scanned yet.
///
/// Keeps the registry total over every configured chain.
pub struct NoopProducer {
    name: String,
}

impl NoopProducer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Producer for NoopProducer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _shutdown: &CancellationToken) -> Result<(), IndexerError> {
        Ok(())
    }
}

struct Entry {
    family: ChainFamily,
    producer: Arc<dyn Producer>,
}

/// Producers keyed by chain name, built once at startup.
#[derive(Default)]
pub struct ProducerRegistry {
    entries: BTreeMap<String, Entry>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the producer for `chain`. Each chain name may appear once.
    pub fn register(
        &mut self,
        chain: impl Into<String>,
        family: ChainFamily,
        producer: Arc<dyn Producer>,
    ) -> Result<(), IndexerError> {
        let chain = chain.into();
        if self.entries.contains_key(&chain) {
            return Err(IndexerError::Other(format!("producer for chain {chain:?} registered twice")));
        }
        self.entries.insert(chain, Entry { family, producer });
        Ok(())
    }

    pub fn get(&self, chain: &str) -> Option<Arc<dyn Producer>> {
        self.entries.get(chain).map(|e| e.producer.clone())
    }

    pub fn family(&self, chain: &str) -> Option<ChainFamily> {
        self.entries.get(chain).map(|e| e.family)
    }

    pub fn chains(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn one supervised task per registered producer.
    pub fn spawn_all(&self, tasks: &mut TaskSet, shutdown: &CancellationToken, backoff: &BackoffConfig) {
        for (chain, entry) in &self.entries {
            tracing::info!(%chain, family = %entry.family, producer = entry.producer.name(), "Spawning producer");
            let producer = entry.producer.clone();
            let token = shutdown.clone();
            tasks.spawn(format!("producer:{chain}"), shutdown.clone(), backoff.clone(), move || {
                let producer = producer.clone();
                let token = token.clone();
                async move { producer.run(&token).await }
            });
        }
    }
}
