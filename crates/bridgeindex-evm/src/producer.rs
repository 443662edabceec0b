//! EVM chain producer: runs every asset handler of one chain concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use bridgeindex_bus::Publish;
use bridgeindex_core::{cursor_key, CursorManager, CursorStore, IndexerError, InitialPosition, Producer};

use crate::handler::{AssetKind, WithdrawnHandler};
use crate::rpc::EvmRpcClient;

/// Static settings for one EVM chain.
#[derive(Debug, Clone)]
pub struct EvmChain {
    pub name: String,
    pub bridge_address: String,
    pub max_block_range: u64,
}

pub struct EvmProducer {
    name: String,
    handlers: Vec<WithdrawnHandler>,
}

impl EvmProducer {
    pub fn new(name: impl Into<String>, handlers: Vec<WithdrawnHandler>) -> Self {
        Self {
            name: name.into(),
            handlers,
        }
    }

    /// One handler per asset kind, cursor keys `evm_<chain>_<kind>`.
    pub fn for_chain(
        chain: &EvmChain,
        client: Arc<dyn EvmRpcClient>,
        cursors: Arc<dyn CursorStore>,
        initial: &InitialPosition,
        publisher: Arc<dyn Publish>,
    ) -> Self {
        let base = cursor_key(&["evm", &chain.name]);
        let handlers = AssetKind::ALL
            .iter()
            .map(|kind| {
                WithdrawnHandler::new(
                    *kind,
                    chain.name.clone(),
                    chain.bridge_address.clone(),
                    chain.max_block_range,
                    client.clone(),
                    CursorManager::new(cursors.clone(), cursor_key(&[&base, kind.name()]), initial),
                    publisher.clone(),
                )
            })
            .collect();
        Self::new(chain.name.clone(), handlers)
    }
}

#[async_trait]
impl Producer for EvmProducer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, shutdown: &CancellationToken) -> Result<(), IndexerError> {
        let results = join_all(self.handlers.iter().map(|h| async move { (h.kind(), h.run(shutdown).await) })).await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|(kind, r)| r.err().map(|e| format!("{}: {e}", kind.name())))
            .collect();
        if failures.is_empty() {
            return Ok(());
        }
        Err(IndexerError::Handler {
            handler: self.name.clone(),
            reason: failures.join("; "),
        })
    }
}
